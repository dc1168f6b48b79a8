use std::sync::Arc;

use anyhow::Result;
use clickhouse::Row;
use serde::Deserialize;
use tuple_in_clause::{
    config::{ClickhouseConfig, ExecutorConfig, RetryConfig},
    ClickhouseExecutor, Executor, InClauseBuilder, SelectQuery, Value,
};

#[derive(Debug, Row, Deserialize)]
struct User {
    id: u64,
    name: String,
    country: String,
    language: String,
}

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS demo_users (
        id UInt64,
        name String,
        country LowCardinality(String),
        language LowCardinality(String)
    ) ENGINE = MergeTree
    ORDER BY (country, language, id)
"#;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let executor = ClickhouseExecutor::connect(load_config(), None).await?;

    executor.execute(CREATE_TABLE_SQL, &[]).await?;
    insert_test_data(&executor).await?;

    let wanted = [
        ["Japan", "Japanese"],
        ["US", "English"],
        ["China", "Chinese"],
    ];

    let query = SelectQuery::table("demo_users")
        .columns(&["id", "name", "country", "language"])
        .where_in_multiple(&["country", "language"], &wanted)
        .build()?;
    log::info!("Running: {} with {} bindings", query.sql, query.bindings.len());

    let users: Vec<User> = executor.fetch_query(&query).await?;
    println!("Matched {} users", users.len());
    for user in &users {
        println!("{:?}", user);
    }

    let chunks = InClauseBuilder::default()
        .max_rows_per_clause(Some(2))
        .build_chunks(&["country", "language"], &wanted)?;
    let chunked: Vec<User> = executor
        .fetch_all_chunked("SELECT id, name, country, language FROM demo_users", &chunks)
        .await?;
    println!("Matched {} users across {} chunks", chunked.len(), chunks.len());

    Ok(())
}

fn load_config() -> Arc<ExecutorConfig> {
    let defaults = ClickhouseConfig::default();

    let host = std::env::var("CLICKHOUSE_HOST").unwrap_or(defaults.host);
    let port = std::env::var("CLICKHOUSE_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(defaults.port);
    let database = std::env::var("CLICKHOUSE_DB").unwrap_or(defaults.database);
    let username = std::env::var("CLICKHOUSE_USER").unwrap_or(defaults.username);
    let password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let config = ClickhouseConfig::new(host, port, database, username, password);

    Arc::new(ExecutorConfig::new(config, RetryConfig::default()))
}

async fn insert_test_data(executor: &ClickhouseExecutor) -> Result<()> {
    let people = [
        ("Aiko", "Japan", "Japanese"),
        ("Bob", "US", "English"),
        ("Chen", "China", "Chinese"),
        ("Dana", "US", "Spanish"),
        ("Emi", "Japan", "English"),
    ];

    let mut bindings = Vec::with_capacity(people.len() * 4);
    let mut rows = Vec::with_capacity(people.len());
    for (i, (name, country, language)) in people.iter().enumerate() {
        rows.push("(?,?,?,?)");
        bindings.extend([
            Value::from(i as u64 + 1),
            Value::from(*name),
            Value::from(*country),
            Value::from(*language),
        ]);
    }

    let sql = format!(
        "INSERT INTO demo_users (id, name, country, language) VALUES {}",
        rows.join(",")
    );
    executor.execute(&sql, &bindings).await?;

    println!("Inserted {} test users", people.len());
    Ok(())
}
