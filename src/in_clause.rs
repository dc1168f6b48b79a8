//! Multi-column `IN` clause rendering.
//!
//! Turns an ordered column list and a set of equal-length rows into a
//! parameterized fragment such as `(country,language) IN ((?,?),(?,?))` plus
//! the flat, row-major list of values to bind against it.

use crate::config::{ClauseConfig, PlaceholderStyle};
use crate::error::{EmptyPart, InClauseError};
use crate::value::Value;

/// A rendered clause and the bindings for its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct InClause {
    fragment: String,
    bindings: Vec<Value>,
    // Byte offset where the value tuples start; everything before it is the
    // column tuple and the operator.
    values_start: usize,
}

impl InClause {
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }

    pub fn placeholder_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.fragment, self.bindings)
    }

    /// Fragment with bindings substituted as literals, for logs only.
    ///
    /// Column names are copied verbatim, so a `?` or `$1` inside a quoted
    /// identifier never consumes a binding.
    pub fn to_inline_sql(&self) -> String {
        let (columns, values) = self.fragment.split_at(self.values_start);
        let mut out = String::with_capacity(self.fragment.len() * 2);
        out.push_str(columns);

        let mut bindings = self.bindings.iter();
        let mut chars = values.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '?' => match bindings.next() {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push(c),
                },
                '$' if chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        digits.push(d);
                        chars.next();
                    }
                    match bindings.next() {
                        Some(value) => out.push_str(&value.to_sql_literal()),
                        None => {
                            out.push('$');
                            out.push_str(&digits);
                        }
                    }
                }
                _ => out.push(c),
            }
        }

        out
    }
}

/// Renders `(c1,...,cm) IN ((?,...),...)` with `?` placeholders and bare
/// identifiers.
///
/// Fails with [`InClauseError::EmptyInput`] when either list is empty and
/// with [`InClauseError::ShapeMismatch`] when a row's length differs from
/// the column count.
pub fn build_in_clause<C, R, V>(columns: &[C], rows: &[R]) -> Result<InClause, InClauseError>
where
    C: AsRef<str>,
    R: AsRef<[V]>,
    V: Clone + Into<Value>,
{
    InClauseBuilder::default().build(columns, rows)
}

#[derive(Debug, Clone, Default)]
pub struct InClauseBuilder {
    config: ClauseConfig,
}

impl InClauseBuilder {
    pub fn new(config: ClauseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClauseConfig {
        &self.config
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.config.placeholder = style;
        self
    }

    pub fn first_index(mut self, index: usize) -> Self {
        self.config.first_index = index;
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.config.negated = negated;
        self
    }

    pub fn max_rows_per_clause(mut self, max_rows: Option<usize>) -> Self {
        self.config.max_rows_per_clause = max_rows;
        self
    }

    pub fn build<C, R, V>(&self, columns: &[C], rows: &[R]) -> Result<InClause, InClauseError>
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        validate(columns, rows)?;
        Ok(self.render(columns, rows, self.config.first_index))
    }

    /// Splits `rows` into clauses of at most `max_rows_per_clause` rows.
    /// A cap of `None` or `Some(0)` yields a single clause.
    /// The whole input is validated before anything is rendered. Numbering
    /// restarts at `first_index` in every chunk since each chunk is sent as
    /// its own statement.
    pub fn build_chunks<C, R, V>(&self, columns: &[C], rows: &[R]) -> Result<Vec<InClause>, InClauseError>
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        validate(columns, rows)?;

        let chunk_size = match self.config.max_rows_per_clause {
            Some(size) if size > 0 => size,
            _ => rows.len(),
        };

        let clauses: Vec<InClause> = rows
            .chunks(chunk_size)
            .map(|chunk| self.render(columns, chunk, self.config.first_index))
            .collect();

        log::debug!(
            "Split {} rows into {} IN clauses of up to {} rows",
            rows.len(),
            clauses.len(),
            chunk_size
        );

        Ok(clauses)
    }

    fn render<C, R, V>(&self, columns: &[C], rows: &[R], first_index: usize) -> InClause
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        let width = columns.len();
        let mut fragment = String::with_capacity(16 + columns.len() * 8 + rows.len() * width * 3);
        let mut bindings = Vec::with_capacity(rows.len() * width);

        fragment.push('(');
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                fragment.push(',');
            }
            fragment.push_str(&self.config.quote_identifiers.quote(column.as_ref()));
        }
        fragment.push_str(if self.config.negated { ") NOT IN (" } else { ") IN (" });
        let values_start = fragment.len();

        let mut next_index = first_index;
        for (r, row) in rows.iter().enumerate() {
            if r > 0 {
                fragment.push(',');
            }
            fragment.push('(');
            for (i, value) in row.as_ref().iter().enumerate() {
                if i > 0 {
                    fragment.push(',');
                }
                match self.config.placeholder {
                    PlaceholderStyle::QuestionMark => fragment.push('?'),
                    PlaceholderStyle::Numbered => {
                        fragment.push('$');
                        fragment.push_str(&next_index.to_string());
                        next_index += 1;
                    }
                }
                bindings.push(value.clone().into());
            }
            fragment.push(')');
        }
        fragment.push(')');

        log::trace!(
            "Rendered IN clause over {} columns and {} rows ({} bindings)",
            width,
            rows.len(),
            bindings.len()
        );

        InClause {
            fragment,
            bindings,
            values_start,
        }
    }
}

fn validate<C, R, V>(columns: &[C], rows: &[R]) -> Result<(), InClauseError>
where
    C: AsRef<str>,
    R: AsRef<[V]>,
{
    if columns.is_empty() {
        return Err(InClauseError::EmptyInput {
            what: EmptyPart::Columns,
        });
    }
    if rows.is_empty() {
        return Err(InClauseError::EmptyInput { what: EmptyPart::Rows });
    }

    let expected = columns.len();
    for (row, values) in rows.iter().enumerate() {
        let actual = values.as_ref().len();
        if actual != expected {
            return Err(InClauseError::ShapeMismatch { row, expected, actual });
        }
    }

    Ok(())
}
