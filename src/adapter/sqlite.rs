//! SQLite adapter implementation.
//!
//! Drives SQLite through sqlx. SQLite has no schema level: databases expand
//! directly to relations. There is no server to signal, so cancellation is a
//! no-op at the adapter and is handled entirely by the runner's cooperative
//! path.

use crate::adapter::{
    expansion_unsupported, Adapter, Backend, CatalogEntry, CatalogKind, ColumnInfo, Connection,
    Row, RowSet, RowStream, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{PrismError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Adapter for SQLite backends.
#[derive(Debug, Default)]
pub struct SqliteAdapter;

#[async_trait]
impl Adapter for SqliteAdapter {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let conn_str = config.to_connection_string()?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| map_connection_error(e, config))?;

        Ok(Arc::new(SqliteConnection { pool }))
    }
}

/// A live SQLite session.
pub struct SqliteConnection {
    pool: SqlitePool,
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        // SQLite always exposes a single attached database named "main".
        Ok(vec![CatalogEntry::database("main")])
    }

    async fn expand(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        match entry.kind {
            CatalogKind::Database => self.fetch_relations(entry).await,
            CatalogKind::Relation => self.fetch_columns(entry).await,
            // No schema level exists; nothing ever produces a Schema entry.
            CatalogKind::Schema => Err(expansion_unsupported(entry)),
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

            if let Some(limit) = limit {
                if rows.len() >= limit {
                    truncated = true;
                    break;
                }
            }
            rows.push(convert_row(&row));
        }

        Ok(RowSet {
            columns,
            rows,
            truncated,
            execution_time: start.elapsed(),
        })
    }

    async fn stream(&self, _sql: &str, _columns: Vec<ColumnInfo>) -> Result<RowStream> {
        // Guarded by Adapter::supports_streaming; export falls back to the
        // materialized result set for this backend.
        Err(PrismError::internal(
            "SQLite connections do not stream; export from the materialized result set",
        ))
    }

    async fn cancel(&self) {
        debug!("Cancel requested; SQLite has no backend-side cancellation");
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteConnection {
    async fn fetch_relations(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PrismError::introspection(format!("Failed to fetch relations: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(name, relation_type)| {
                let type_label = match relation_type.as_str() {
                    "view" => "v",
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
        let relation = entry.path.last().cloned().unwrap_or_default();

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info($1) ORDER BY cid")
                .bind(&relation)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    PrismError::introspection(format!(
                        "Failed to fetch columns for {relation}: {e}"
                    ))
                })?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| {
                let type_label = data_type.to_lowercase();
                CatalogEntry::child_of(&entry.path, CatalogKind::Column, name, Some(type_label))
            })
            .collect())
    }
}

/// Extracts column metadata from a result row.
fn column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx SqliteRow to our Row type.
fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a SqliteRow to our Value type.
fn convert_value(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INTEGER" | "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "REAL" | "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // TEXT, NULL, and everything declared with a custom affinity
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> PrismError {
    let path = config
        .path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string());

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unable to open") || error_str.contains("no such file") {
        PrismError::connection(format!(
            "Cannot open database file '{path}'. Check that the file exists and is readable."
        ))
    } else {
        PrismError::connection(error.to_string())
    }
}

/// Formats a query error from the backend.
fn format_query_error(error: sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => format!("ERROR: {}", db_error.message()),
        None => error.to_string(),
    }
}
