use serde_derive::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use url::Url;

pub const FIRST_PLACEHOLDER_INDEX_DEFAULT: usize = 1;

pub const CONNECTION_TIMEOUT_SECONDS_DEFAULT: u64 = 3;
pub const QUERY_TIMEOUT_SECONDS_DEFAULT: u64 = 10;
pub const PORT_DEFAULT: u16 = 8123;

pub const MAX_RETRIES_DEFAULT: u32 = 5;
pub const INITIAL_BACKOFF_MS_DEFAULT: u64 = 100;
pub const MAX_BACKOFF_MS_DEFAULT: u64 = 10_000;
pub const BACKOFF_MULTIPLIER_DEFAULT: f64 = 2.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?`
    #[default]
    QuestionMark,
    /// `$1`, `$2`, ...
    Numbered,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierQuote {
    #[default]
    None,
    /// `"col"`
    DoubleQuote,
    /// `` `col` ``
    Backtick,
}

impl IdentifierQuote {
    pub fn quote(&self, ident: &str) -> String {
        match self {
            IdentifierQuote::None => ident.to_string(),
            IdentifierQuote::DoubleQuote => format!("\"{}\"", ident.replace('"', "\"\"")),
            IdentifierQuote::Backtick => format!("`{}`", ident.replace('`', "``")),
        }
    }
}

/// Rendering options for IN clauses. The default renders `?` placeholders
/// and bare identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseConfig {
    /// Placeholder marker
    #[serde(default)]
    pub placeholder: PlaceholderStyle,

    /// Number of the first placeholder when `placeholder` is `numbered`
    #[serde(default = "default_first_index")]
    pub first_index: usize,

    /// Quoting applied to column names
    #[serde(default)]
    pub quote_identifiers: IdentifierQuote,

    /// Render `NOT IN` instead of `IN`
    #[serde(default)]
    pub negated: bool,

    /// Max. number of rows per clause when building chunks; `None` and
    /// `Some(0)` both mean no cap
    #[serde(default)]
    pub max_rows_per_clause: Option<usize>,
}

fn default_first_index() -> usize {
    FIRST_PLACEHOLDER_INDEX_DEFAULT
}

impl Default for ClauseConfig {
    fn default() -> Self {
        Self {
            placeholder: PlaceholderStyle::default(),
            first_index: FIRST_PLACEHOLDER_INDEX_DEFAULT,
            quote_identifiers: IdentifierQuote::default(),
            negated: false,
            max_rows_per_clause: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickhouseConfig {
    /// Database host
    pub host: String,

    /// HTTP interface port
    pub port: u16,

    /// Database name
    pub database: String,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Use https instead of http
    #[serde(default)]
    pub secure: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

fn default_connect_timeout() -> u64 {
    CONNECTION_TIMEOUT_SECONDS_DEFAULT
}

fn default_query_timeout() -> u64 {
    QUERY_TIMEOUT_SECONDS_DEFAULT
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: PORT_DEFAULT,
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            secure: false,
            connect_timeout_seconds: CONNECTION_TIMEOUT_SECONDS_DEFAULT,
            query_timeout_seconds: QUERY_TIMEOUT_SECONDS_DEFAULT,
        }
    }
}

impl ClickhouseConfig {
    pub fn new(host: String, port: u16, database: String, username: String, password: String) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            ..Default::default()
        }
    }

    pub fn connection_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{}://{}:{}", scheme, self.host, self.port))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Max number of retry attempts
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Max backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES_DEFAULT,
            initial_backoff_ms: INITIAL_BACKOFF_MS_DEFAULT,
            max_backoff_ms: MAX_BACKOFF_MS_DEFAULT,
            backoff_multiplier: BACKOFF_MULTIPLIER_DEFAULT,
        }
    }
}

impl RetryConfig {
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let backoff_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent)) as u64;

        Duration::from_millis(backoff_ms.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub clickhouse: Arc<ClickhouseConfig>,
    pub retry: Arc<RetryConfig>,
}

impl ExecutorConfig {
    pub fn new(clickhouse: ClickhouseConfig, retry: RetryConfig) -> Self {
        Self {
            clickhouse: Arc::new(clickhouse),
            retry: Arc::new(retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig::default();

        assert_eq!(retry.backoff_duration(0), Duration::ZERO);
        assert_eq!(retry.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_duration(4), Duration::from_millis(800));
        assert_eq!(retry.backoff_duration(30), Duration::from_millis(MAX_BACKOFF_MS_DEFAULT));
    }

    #[test]
    fn clause_config_fills_defaults() {
        let config: ClauseConfig = serde_json::from_str(r#"{"placeholder": "numbered"}"#).unwrap();

        assert_eq!(config.placeholder, PlaceholderStyle::Numbered);
        assert_eq!(config.first_index, 1);
        assert_eq!(config.quote_identifiers, IdentifierQuote::None);
        assert!(!config.negated);
        assert_eq!(config.max_rows_per_clause, None);
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(IdentifierQuote::None.quote("country"), "country");
        assert_eq!(IdentifierQuote::DoubleQuote.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(IdentifierQuote::Backtick.quote("lang"), "`lang`");
    }

    #[test]
    fn builds_connection_url() {
        let mut config = ClickhouseConfig::default();
        assert_eq!(config.connection_url().unwrap().as_str(), "http://localhost:8123/");

        config.secure = true;
        config.host = "ch.internal".to_string();
        assert_eq!(config.connection_url().unwrap().as_str(), "https://ch.internal:8123/");
    }

    #[test]
    fn clickhouse_config_timeouts_default_when_missing() {
        let config: ClickhouseConfig = serde_json::from_str(
            r#"{"host":"db","port":8123,"database":"geo","username":"u","password":"p"}"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout(), Duration::from_secs(CONNECTION_TIMEOUT_SECONDS_DEFAULT));
        assert_eq!(config.query_timeout(), Duration::from_secs(QUERY_TIMEOUT_SECONDS_DEFAULT));
    }
}
