//! PostgreSQL adapter implementation.
//!
//! Drives PostgreSQL through sqlx. Execution runs on a single-connection
//! pool; a second single-connection control pool carries best-effort
//! `pg_cancel_backend` requests while the primary connection is busy.

use crate::adapter::{
    expansion_unsupported, Adapter, Backend, CatalogEntry, CatalogKind, ColumnInfo, Connection,
    Row, RowSet, RowStream, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{PrismError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Rows buffered in flight when streaming for export.
const STREAM_BUFFER: usize = 256;

/// Adapter for PostgreSQL backends.
#[derive(Debug, Default)]
pub struct PostgresAdapter;

#[async_trait]
impl Adapter for PostgresAdapter {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let conn_str = config.to_connection_string()?;

        let pool = connect_with_retry(&conn_str, config).await?;
        let control = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| map_connection_error(e, config))?;

        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&pool)
            .await
            .map_err(|e| PrismError::connection(format!("Failed to read backend pid: {e}")))?;

        Ok(Arc::new(PostgresConnection {
            pool,
            control,
            backend_pid,
        }))
    }
}

/// Opens the execution pool, retrying transient failures with backoff.
async fn connect_with_retry(conn_str: &str, config: &ConnectionConfig) -> Result<PgPool> {
    let mut last_error = None;
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

        let result = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(conn_str)
            .await;

        match result {
            Ok(pool) => {
                debug!("Successfully connected to database");
                return Ok(pool);
            }
            Err(e) => {
                let is_transient = is_transient_error(&e);
                last_error = Some(e);

                if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2; // Exponential backoff
                }
            }
        }
    }

    // All retries exhausted
    Err(map_connection_error(
        last_error.expect("at least one attempt was made"),
        config,
    ))
}

/// A live PostgreSQL session.
pub struct PostgresConnection {
    pool: PgPool,
    control: PgPool,
    backend_pid: i32,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        let database: String = sqlx::query_scalar("SELECT current_database()::text")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                PrismError::introspection(format!("Failed to read current database: {e}"))
            })?;

        Ok(vec![CatalogEntry::database(database)])
    }

    async fn expand(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        match entry.kind {
            CatalogKind::Database => self.fetch_schemas(entry).await,
            CatalogKind::Schema => self.fetch_relations(entry).await,
            CatalogKind::Relation => self.fetch_columns(entry).await,
            CatalogKind::Column => Err(expansion_unsupported(entry)),
        }
    }

    async fn execute(&self, sql: &str, limit: Option<usize>) -> Result<RowSet> {
        let start = Instant::now();

        let mut stream = sqlx::query(sql).fetch(&self.pool);
        let mut rows: Vec<Row> = Vec::new();
        let mut columns: Vec<ColumnInfo> = Vec::new();
        let mut truncated = false;

        loop {
            let row = stream
                .try_next()
                .await
                .map_err(|e| PrismError::execution(format_query_error(e)))?;

            let Some(row) = row else {
                break;
            };

            if columns.is_empty() {
                columns = column_info(&row);
            }

            // Fetch up to the limit, then peek one further row only to learn
            // whether the set was capped; the extra row is dropped.
            if let Some(limit) = limit {
                if rows.len() >= limit {
                    truncated = true;
                    break;
                }
            }
            rows.push(convert_row(&row));
        }
        drop(stream);

        if columns.is_empty() {
            columns = self.describe_columns(sql).await;
        }

        Ok(RowSet {
            columns,
            rows,
            truncated,
            execution_time: start.elapsed(),
        })
    }

    async fn stream(&self, sql: &str, columns: Vec<ColumnInfo>) -> Result<RowStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_BUFFER);
        let pool = self.pool.clone();
        let sql = sql.to_string();

        tokio::spawn(async move {
            let mut stream = sqlx::query(&sql).fetch(&pool);
            loop {
                match stream.try_next().await {
                    Ok(Some(row)) => {
                        if tx.send(Ok(convert_row(&row))).await.is_err() {
                            break; // consumer dropped the stream
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(Err(PrismError::execution(format_query_error(e))))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(RowStream::from_cursor(columns, rx))
    }

    async fn cancel(&self) {
        let result: std::result::Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_cancel_backend($1)")
                .bind(self.backend_pid)
                .fetch_one(&self.control)
                .await;

        match result {
            Ok(signalled) => debug!(
                "Cancel request for backend {} signalled={}",
                self.backend_pid, signalled
            ),
            Err(e) => debug!("Cancel request failed (ignored): {e}"),
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        self.control.close().await;
        Ok(())
    }
}

impl PostgresConnection {
    async fn fetch_schemas(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PrismError::introspection(format!("Failed to fetch schemas: {e}")))?;

        Ok(names
            .into_iter()
            .map(|name| CatalogEntry::child_of(&entry.path, CatalogKind::Schema, name, None))
            .collect())
    }

    async fn fetch_relations(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        let schema = entry.path.last().cloned().unwrap_or_default();

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT table_name::text, table_type::text
            FROM information_schema.tables
            WHERE table_schema = $1
            ORDER BY table_name
            "#,
        )
        .bind(&schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            PrismError::introspection(format!("Failed to fetch relations for {schema}: {e}"))
        })?;

        Ok(rows
            .into_iter()
            .map(|(name, table_type)| {
                let type_label = match table_type.as_str() {
                    "VIEW" => "v",
                    _ => "t",
                };
                CatalogEntry::child_of(
                    &entry.path,
                    CatalogKind::Relation,
                    name,
                    Some(type_label.to_string()),
                )
            })
            .collect())
    }

    async fn fetch_columns(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        let mut ancestry = entry.path.iter().rev();
        let relation = ancestry.next().cloned().unwrap_or_default();
        let schema = ancestry.next().cloned().unwrap_or_default();

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&schema)
        .bind(&relation)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            PrismError::introspection(format!("Failed to fetch columns for {relation}: {e}"))
        })?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| {
                CatalogEntry::child_of(&entry.path, CatalogKind::Column, name, Some(data_type))
            })
            .collect())
    }

    /// Fetches column metadata for a statement that returned no rows.
    ///
    /// Best effort: non-queries (e.g. DDL) have no describable columns and
    /// yield an empty list.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match self.pool.describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Extracts column metadata from a result row.
fn column_info(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // For all other types, try to get as string
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    // Authentication and database-not-found errors are not transient
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> PrismError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port.unwrap_or_else(|| config.backend.default_port());
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        PrismError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        PrismError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        PrismError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        PrismError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        PrismError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        PrismError::connection(error.to_string())
    }
}

/// Formats a query error with backend detail and hints where available.
fn format_query_error(error: sqlx::Error) -> String {
    let mut result = String::new();

    if let Some(db_error) = error.as_database_error() {
        result.push_str("ERROR: ");
        result.push_str(db_error.message());

        if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg_error.detail() {
                result.push_str("\n  DETAIL: ");
                result.push_str(detail);
            }

            if let Some(hint) = pg_error.hint() {
                result.push_str("\n  HINT: ");
                result.push_str(hint);
            }
        }
    } else {
        result = error.to_string();
    }

    result
}
