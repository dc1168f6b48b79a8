use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use clickhouse::query::Query;
use clickhouse::Client;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::in_clause::InClause;
use crate::metrics::{Kind, MetricConfig, Registry, SharedRegistrar};
use crate::query::BuiltQuery;
use crate::value::Value;

/// Anything that runs SQL text against positional bindings.
pub trait Executor: Send + Sync {
    fn execute(&self, sql: &str, bindings: &[Value]) -> impl Future<Output = Result<(), ExecutorError>> + Send;

    fn execute_query(&self, query: &BuiltQuery) -> impl Future<Output = Result<(), ExecutorError>> + Send {
        self.execute(&query.sql, &query.bindings)
    }

    /// Runs `{prefix} WHERE {fragment}`.
    fn execute_clause(
        &self,
        prefix: &str,
        clause: &InClause,
    ) -> impl Future<Output = Result<(), ExecutorError>> + Send {
        async move {
            let sql = format!("{} WHERE {}", prefix, clause.fragment());
            self.execute(&sql, clause.bindings()).await
        }
    }
}

pub fn get_query_type(query: &str) -> &'static str {
    let query = query.trim_start().to_uppercase();

    if query.starts_with("SELECT") || query.starts_with("WITH") {
        "select"
    } else if query.starts_with("INSERT") {
        "insert"
    } else if query.starts_with("DELETE") {
        "delete"
    } else if query.starts_with("CREATE") {
        "create"
    } else if query.starts_with("ALTER") {
        "alter"
    } else if query.starts_with("DROP") {
        "drop"
    } else {
        "other"
    }
}

/// Counts `?` placeholders the way the clickhouse query builder splits its
/// template. Quoting is not considered. `??` and `\?` are literal question
/// marks and `?fields` is the column list marker.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(|&(_, next)| next == '?') => {
                chars.next();
            }
            '?' if chars.peek().is_some_and(|&(_, next)| next == '?') => {
                chars.next();
            }
            '?' if !sql[i + 1..].starts_with("fields") => count += 1,
            _ => {}
        }
    }

    count
}

/// Binds every value onto `query` in order.
pub fn bind_all(query: Query, bindings: &[Value]) -> Query {
    bindings.iter().fold(query, |query, value| query.bind(value))
}

pub struct ClickhouseExecutor {
    client: Client,
    config: Arc<ExecutorConfig>,
    metrics: Option<SharedRegistrar>,
}

impl ClickhouseExecutor {
    pub fn new(config: Arc<ExecutorConfig>, metrics: Option<SharedRegistrar>) -> Result<Self, ExecutorError> {
        if let Some(metrics_ref) = &metrics {
            Self::register_metrics(metrics_ref);
        }

        let client = Self::create_client(&config)?;

        log::debug!(
            "Created Clickhouse executor for {}:{}/{}",
            config.clickhouse.host,
            config.clickhouse.port,
            config.clickhouse.database
        );

        Ok(Self {
            client,
            config,
            metrics,
        })
    }

    /// Like [`ClickhouseExecutor::new`], but also requires a `SELECT 1` to
    /// succeed within the connect timeout.
    pub async fn connect(config: Arc<ExecutorConfig>, metrics: Option<SharedRegistrar>) -> Result<Self, ExecutorError> {
        let executor = Self::new(config, metrics)?;
        executor.health_check().await?;
        Ok(executor)
    }

    pub async fn health_check(&self) -> Result<(), ExecutorError> {
        let validation_timeout = self.config.clickhouse.connect_timeout();

        let (status, result) = match timeout(validation_timeout, self.client.query("SELECT 1").execute()).await {
            Ok(Ok(())) => ("success", Ok(())),
            Ok(Err(e)) => {
                log::warn!("Clickhouse health check failed: {}", e);
                ("failure", Err(ExecutorError::Client(e)))
            }
            Err(_) => {
                log::warn!("Clickhouse health check timed out after: {:?}", validation_timeout);
                ("timeout", Err(ExecutorError::Timeout))
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.inc_int_counter_vec("in_clause_health_checks_total", &[status]);
        }

        result
    }

    pub fn create_client(config: &ExecutorConfig) -> Result<Client, ExecutorError> {
        let clickhouse = &config.clickhouse;
        let url = clickhouse.connection_url()?;

        let client = Client::default()
            .with_url(url.as_str())
            .with_user(&clickhouse.username)
            .with_password(&clickhouse.password)
            .with_database(&clickhouse.database);

        Ok(client)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn execute_with_retry(&self, sql: &str, bindings: &[Value]) -> Result<(), ExecutorError> {
        self.run_with_retry(sql, bindings, |query| query.execute()).await
    }

    pub async fn fetch_all_with_retry<T>(&self, sql: &str, bindings: &[Value]) -> Result<Vec<T>, ExecutorError>
    where
        T: clickhouse::Row + DeserializeOwned + Send + 'static,
    {
        self.run_with_retry(sql, bindings, |query| query.fetch_all::<T>())
            .await
    }

    pub async fn fetch_query<T>(&self, query: &BuiltQuery) -> Result<Vec<T>, ExecutorError>
    where
        T: clickhouse::Row + DeserializeOwned + Send + 'static,
    {
        self.fetch_all_with_retry(&query.sql, &query.bindings).await
    }

    /// Runs `{select_prefix} WHERE {fragment}` for every chunk concurrently and
    /// concatenates the rows in chunk order.
    pub async fn fetch_all_chunked<T>(&self, select_prefix: &str, chunks: &[InClause]) -> Result<Vec<T>, ExecutorError>
    where
        T: clickhouse::Row + DeserializeOwned + Send + 'static,
    {
        let statements: Vec<String> = chunks
            .iter()
            .map(|chunk| format!("{} WHERE {}", select_prefix, chunk.fragment()))
            .collect();

        log::debug!("Fetching {} IN clause chunks", statements.len());

        let fetches = statements
            .iter()
            .zip(chunks)
            .map(|(sql, chunk)| self.fetch_all_with_retry::<T>(sql, chunk.bindings()));

        let results = try_join_all(fetches).await?;

        Ok(results.into_iter().flatten().collect())
    }

    async fn run_with_retry<F, Fut, O>(&self, sql: &str, bindings: &[Value], mut run: F) -> Result<O, ExecutorError>
    where
        F: FnMut(Query) -> Fut,
        Fut: Future<Output = Result<O, clickhouse::error::Error>>,
    {
        let query_type = get_query_type(sql);

        let placeholders = count_placeholders(sql);
        if placeholders != bindings.len() {
            log::error!(
                "Refusing to run query with {} placeholders and {} bindings: {}",
                placeholders,
                bindings.len(),
                sql
            );
            return Err(ExecutorError::BindingCount {
                placeholders,
                bindings: bindings.len(),
            });
        }

        let max_retries = self.config.retry.max_retries;
        let query_timeout = self.config.clickhouse.query_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let start = Instant::now();
            let query = bind_all(self.client.query(sql), bindings);

            let outcome = match timeout(query_timeout, run(query)).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ExecutorError::Client(e)),
                Err(_) => Err(ExecutorError::Timeout),
            };

            match outcome {
                Ok(output) => {
                    let duration = start.elapsed();
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_int_counter_vec("in_clause_query_success_total", &[query_type]);
                        metrics.set_gauge_vec(
                            "in_clause_query_duration_seconds",
                            &[query_type],
                            duration.as_secs_f64(),
                        );
                    }

                    log::debug!(
                        "Query [{}] with {} bindings completed in {:?}",
                        query_type,
                        bindings.len(),
                        duration
                    );
                    return Ok(output);
                }
                Err(e) => {
                    if attempt > max_retries {
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_int_counter_vec("in_clause_query_errors_total", &[query_type]);
                        }

                        log::error!("Query failed after {} attempts: {}", attempt, e);
                        return Err(e);
                    }

                    let backoff = self.config.retry.backoff_duration(attempt);
                    log::warn!(
                        "Query failed (attempt {}/{}), retrying in {:?}: {}\nQuery: {}",
                        attempt,
                        max_retries,
                        backoff,
                        e,
                        sql
                    );

                    if let Some(metrics) = &self.metrics {
                        metrics.inc_int_counter_vec("in_clause_query_retries_total", &[query_type]);
                    }

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn register_metrics(metrics: &SharedRegistrar) {
        let metric_configs = [
            MetricConfig {
                kind: Kind::IntCounterVec,
                name: "in_clause_query_success_total",
                help: "Total no. of queries executed successfully",
                label_names: &["type"],
            },
            MetricConfig {
                kind: Kind::IntCounterVec,
                name: "in_clause_query_retries_total",
                help: "Total no. of query retries",
                label_names: &["type"],
            },
            MetricConfig {
                kind: Kind::IntCounterVec,
                name: "in_clause_query_errors_total",
                help: "Total no. of queries that failed after all retries",
                label_names: &["type"],
            },
            MetricConfig {
                kind: Kind::IntCounterVec,
                name: "in_clause_health_checks_total",
                help: "Total no. of connection health checks",
                label_names: &["status"],
            },
            MetricConfig {
                kind: Kind::GaugeVec,
                name: "in_clause_query_duration_seconds",
                help: "Query execution time in seconds",
                label_names: &["type"],
            },
        ];

        if let Err(e) = metrics.with_metric_configs(&metric_configs) {
            log::warn!("Failed to register executor metrics: {}", e);
        }
    }
}

impl Executor for ClickhouseExecutor {
    async fn execute(&self, sql: &str, bindings: &[Value]) -> Result<(), ExecutorError> {
        self.execute_with_retry(sql, bindings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClickhouseConfig, RetryConfig};
    use crate::in_clause::build_in_clause;
    use crate::metrics::Registrar;

    fn unreachable_config() -> Arc<ExecutorConfig> {
        let clickhouse = ClickhouseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_seconds: 2,
            query_timeout_seconds: 2,
            ..Default::default()
        };
        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff_multiplier: 1.0,
        };

        Arc::new(ExecutorConfig::new(clickhouse, retry))
    }

    #[test]
    fn classifies_queries() {
        assert_eq!(get_query_type("  select 1"), "select");
        assert_eq!(get_query_type("WITH x AS (SELECT 1) SELECT * FROM x"), "select");
        assert_eq!(get_query_type("INSERT INTO t VALUES (1)"), "insert");
        assert_eq!(get_query_type("DELETE FROM t WHERE (a,b) IN ((?,?))"), "delete");
        assert_eq!(get_query_type("ALTER TABLE t DELETE WHERE 1"), "alter");
        assert_eq!(get_query_type("OPTIMIZE TABLE t"), "other");
    }

    #[test]
    fn counts_placeholders_like_the_driver() {
        assert_eq!(count_placeholders("(a,b) IN ((?,?),(?,?))"), 4);
        assert_eq!(count_placeholders("SELECT '?' AS q FROM t WHERE x = ?"), 2);
        assert_eq!(count_placeholders("SELECT \"c?\" FROM t"), 1);
        assert_eq!(count_placeholders("SELECT 'what??' WHERE y = ?"), 1);
        assert_eq!(count_placeholders("SELECT 'what\\?' WHERE y = ?"), 1);
        assert_eq!(count_placeholders("SELECT ?fields FROM t WHERE id = ?"), 1);
        assert_eq!(count_placeholders("SELECT 1"), 0);
    }

    #[tokio::test]
    async fn quoted_question_mark_needs_a_binding() {
        let executor = ClickhouseExecutor::new(unreachable_config(), None).unwrap();

        let err = executor
            .execute_with_retry("SELECT '?' AS q FROM t WHERE x = ?", &[Value::Int(1)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::BindingCount {
                placeholders: 2,
                bindings: 1
            }
        ));
    }

    #[tokio::test]
    async fn connect_runs_health_check() {
        let registrar = Arc::new(Registrar::default());

        let result = ClickhouseExecutor::connect(unreachable_config(), Some(registrar.clone())).await;
        assert!(matches!(
            result,
            Err(ExecutorError::Client(_)) | Err(ExecutorError::Timeout)
        ));

        let checks: f64 = registrar
            .gather()
            .into_iter()
            .filter(|family| family.get_name() == "in_clause_health_checks_total")
            .flat_map(|family| family.get_metric().to_vec())
            .map(|metric| metric.get_counter().get_value())
            .sum();
        assert_eq!(checks, 1.0);
    }

    #[test]
    fn placeholders_of_built_clause_match_bindings() {
        let clause = build_in_clause(&["country", "language"], &[["Japan", "Japanese"], ["US", "English"]]).unwrap();

        assert_eq!(count_placeholders(clause.fragment()), clause.bindings().len());
    }

    #[test]
    fn rejects_bad_url() {
        let clickhouse = ClickhouseConfig {
            host: "bad host".to_string(),
            ..Default::default()
        };
        let config = Arc::new(ExecutorConfig::new(clickhouse, RetryConfig::default()));

        assert!(matches!(
            ClickhouseExecutor::new(config, None),
            Err(ExecutorError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn binding_count_checked_before_sending() {
        let executor = ClickhouseExecutor::new(unreachable_config(), None).unwrap();

        let err = executor
            .execute_with_retry("SELECT 1 WHERE (a,b) IN ((?,?))", &[Value::Int(1)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::BindingCount {
                placeholders: 2,
                bindings: 1
            }
        ));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let registrar = Arc::new(Registrar::default());
        let executor = ClickhouseExecutor::new(unreachable_config(), Some(registrar.clone())).unwrap();
        let clause = build_in_clause(&["country"], &[["Japan"]]).unwrap();

        let result = executor.execute_clause("SELECT 1 FROM greetings", &clause).await;
        assert!(result.is_err());

        let retries = registrar
            .gather()
            .into_iter()
            .find(|family| family.get_name() == "in_clause_query_retries_total")
            .map(|family| family.get_metric()[0].get_counter().get_value());
        assert_eq!(retries, Some(1.0));
    }
}
