pub mod config;
pub mod error;
pub mod executor;
pub mod in_clause;
pub mod metrics;
pub mod query;
pub mod traits;
pub mod value;

pub use config::{ClauseConfig, IdentifierQuote, PlaceholderStyle};
pub use error::{EmptyPart, ExecutorError, InClauseError};
pub use executor::{ClickhouseExecutor, Executor};
pub use in_clause::{build_in_clause, InClause, InClauseBuilder};
pub use query::{BuiltQuery, Direction, SelectQuery};
pub use traits::Model;
pub use value::Value;
