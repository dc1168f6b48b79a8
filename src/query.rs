//! A small SELECT builder with `where_in_multiple`.
//!
//! Predicates keep insertion order and their bindings are concatenated in the
//! same order, so the final binding list lines up with the placeholders in
//! the rendered SQL.

use crate::config::{ClauseConfig, PlaceholderStyle};
use crate::error::InClauseError;
use crate::in_clause::InClauseBuilder;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// SQL text plus positional bindings, ready for an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

#[derive(Debug, Clone)]
enum Predicate {
    Raw { sql: String, bindings: Vec<Value> },
    InMultiple { columns: Vec<String>, rows: Vec<Vec<Value>>, negated: bool },
}

#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: String,
    columns: Vec<String>,
    predicates: Vec<Predicate>,
    order_by: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
    config: ClauseConfig,
}

impl SelectQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            config: ClauseConfig::default(),
        }
    }

    /// Rendering options applied to every IN clause in this query.
    /// `first_index` is the number of the query's first placeholder.
    pub fn with_config(mut self, config: ClauseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Adds a raw predicate. Its placeholders must use the same style as the
    /// rest of the query.
    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.predicates.push(Predicate::Raw {
            sql: sql.into(),
            bindings,
        });
        self
    }

    pub fn where_in_multiple<C, R, V>(self, columns: &[C], rows: &[R]) -> Self
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        self.push_in_multiple(columns, rows, false)
    }

    pub fn where_not_in_multiple<C, R, V>(self, columns: &[C], rows: &[R]) -> Self
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        self.push_in_multiple(columns, rows, true)
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    // Values are converted eagerly; shape errors surface from `build`.
    fn push_in_multiple<C, R, V>(mut self, columns: &[C], rows: &[R], negated: bool) -> Self
    where
        C: AsRef<str>,
        R: AsRef<[V]>,
        V: Clone + Into<Value>,
    {
        self.predicates.push(Predicate::InMultiple {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.as_ref().iter().cloned().map(Into::into).collect())
                .collect(),
            negated,
        });
        self
    }

    pub fn build(&self) -> Result<BuiltQuery, InClauseError> {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        let mut bindings: Vec<Value> = Vec::new();
        let mut conditions: Vec<String> = Vec::with_capacity(self.predicates.len());

        for predicate in &self.predicates {
            match predicate {
                Predicate::Raw { sql: raw_sql, bindings: raw } => {
                    conditions.push(raw_sql.clone());
                    bindings.extend(raw.iter().cloned());
                }
                Predicate::InMultiple {
                    columns,
                    rows,
                    negated,
                } => {
                    let mut config = self.config.clone();
                    config.negated = *negated;
                    if config.placeholder == PlaceholderStyle::Numbered {
                        config.first_index = self.config.first_index + bindings.len();
                    }

                    let (fragment, values) = InClauseBuilder::new(config).build(columns, rows)?.into_parts();
                    conditions.push(fragment);
                    bindings.extend(values);
                }
            }
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(BuiltQuery { sql, bindings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmptyPart;

    #[test]
    fn selects_by_country_and_language() {
        let query = SelectQuery::table("users")
            .columns(&["id", "name"])
            .where_in_multiple(
                &["country", "language"],
                &[["Japan", "Japanese"], ["US", "English"], ["China", "Chinese"]],
            )
            .build()
            .unwrap();

        assert_eq!(
            query.sql,
            "SELECT id, name FROM users WHERE (country,language) IN ((?,?),(?,?),(?,?))"
        );
        assert_eq!(query.bindings.len(), 6);
        assert_eq!(query.bindings[0], Value::from("Japan"));
        assert_eq!(query.bindings[5], Value::from("Chinese"));
    }

    #[test]
    fn bindings_follow_predicate_order() {
        let query = SelectQuery::table("users")
            .where_raw("active = ?", vec![Value::Bool(true)])
            .where_not_in_multiple(&["country", "language"], &[["US", "English"]])
            .order_by("id", Direction::Desc)
            .limit(20)
            .offset(40)
            .build()
            .unwrap();

        assert_eq!(
            query.sql,
            "SELECT * FROM users WHERE active = ? AND (country,language) NOT IN ((?,?)) ORDER BY id DESC LIMIT 20 OFFSET 40"
        );
        assert_eq!(
            query.bindings,
            vec![Value::Bool(true), Value::from("US"), Value::from("English")]
        );
    }

    #[test]
    fn numbered_placeholders_continue_across_predicates() {
        let config = ClauseConfig {
            placeholder: PlaceholderStyle::Numbered,
            ..Default::default()
        };

        let query = SelectQuery::table("t")
            .with_config(config)
            .where_raw("tenant_id = $1", vec![Value::Int(9)])
            .where_in_multiple(&["a", "b"], &[[1, 2], [3, 4]])
            .where_in_multiple(&["c"], &[[5]])
            .build()
            .unwrap();

        assert_eq!(
            query.sql,
            "SELECT * FROM t WHERE tenant_id = $1 AND (a,b) IN (($2,$3),($4,$5)) AND (c) IN (($6))"
        );
        assert_eq!(query.bindings.len(), 6);
    }

    #[test]
    fn first_clause_error_surfaces_from_build() {
        let empty: Vec<Vec<i64>> = Vec::new();

        let err = SelectQuery::table("t")
            .where_in_multiple(&["a"], &empty)
            .where_in_multiple(&["a", "b"], &[vec![1]])
            .build()
            .unwrap_err();

        assert_eq!(err, InClauseError::EmptyInput { what: EmptyPart::Rows });
    }
}
