use crate::error::InClauseError;
use crate::in_clause::{build_in_clause, InClause};
use crate::query::{BuiltQuery, SelectQuery};
use crate::value::Value;

/// A row type addressable by a (possibly composite) key.
pub trait Model: Sized {
    fn table_name() -> &'static str;
    fn column_names() -> Vec<&'static str>;
    fn key_columns() -> Vec<&'static str>;
    /// Values for `key_columns`, in the same order.
    fn key_values(&self) -> Vec<Value>;

    fn keys_in_clause(items: &[Self]) -> Result<InClause, InClauseError> {
        let rows: Vec<Vec<Value>> = items.iter().map(Self::key_values).collect();
        build_in_clause(&Self::key_columns(), &rows)
    }

    fn select_by_keys(items: &[Self]) -> Result<BuiltQuery, InClauseError> {
        let rows: Vec<Vec<Value>> = items.iter().map(Self::key_values).collect();
        SelectQuery::table(Self::table_name())
            .columns(&Self::column_names())
            .where_in_multiple(&Self::key_columns(), &rows)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeting {
        country: &'static str,
        language: &'static str,
        text: &'static str,
    }

    impl Model for Greeting {
        fn table_name() -> &'static str {
            "greetings"
        }

        fn column_names() -> Vec<&'static str> {
            vec!["country", "language", "text"]
        }

        fn key_columns() -> Vec<&'static str> {
            vec!["country", "language"]
        }

        fn key_values(&self) -> Vec<Value> {
            vec![self.country.into(), self.language.into()]
        }
    }

    fn greetings() -> Vec<Greeting> {
        vec![
            Greeting {
                country: "Japan",
                language: "Japanese",
                text: "konnichiwa",
            },
            Greeting {
                country: "US",
                language: "English",
                text: "hello",
            },
        ]
    }

    #[test]
    fn key_clause_from_models() {
        let clause = Greeting::keys_in_clause(&greetings()).unwrap();

        assert_eq!(clause.fragment(), "(country,language) IN ((?,?),(?,?))");
        assert_eq!(
            clause.bindings(),
            &[
                Value::from("Japan"),
                Value::from("Japanese"),
                Value::from("US"),
                Value::from("English")
            ]
        );
        assert_eq!(greetings()[1].text, "hello");
    }

    #[test]
    fn select_by_keys_renders_full_query() {
        let query = Greeting::select_by_keys(&greetings()).unwrap();

        assert_eq!(
            query.sql,
            "SELECT country, language, text FROM greetings WHERE (country,language) IN ((?,?),(?,?))"
        );
        assert_eq!(query.bindings.len(), 4);
    }

    #[test]
    fn no_models_is_empty_input() {
        assert!(matches!(
            Greeting::keys_in_clause(&[]),
            Err(InClauseError::EmptyInput { .. })
        ));
    }
}
