//! Mock adapter for testing.
//!
//! Provides an in-memory backend with a scriptable catalog and result set,
//! plus counters (executions, expansions, cancel requests) that tests can
//! inspect. Latency can be injected to exercise cancellation races.

use super::{
    expansion_unsupported, Adapter, Backend, CatalogEntry, CatalogKind, ColumnInfo, Connection,
    RowSet, RowStream, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{PrismError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observable state shared between a mock adapter and its connections.
#[derive(Default)]
pub struct MockState {
    scripted: Mutex<HashMap<String, RowSet>>,
    expand_counts: Mutex<HashMap<String, usize>>,
    executed: Mutex<Vec<String>>,
    cancel_requests: AtomicUsize,
}

impl MockState {
    /// Number of times `cancel` was requested on any connection.
    pub fn cancel_requests(&self) -> usize {
        self.cancel_requests.load(Ordering::SeqCst)
    }

    /// Number of times the entry at `path` was asked for children.
    pub fn expand_count(&self, path: &[&str]) -> usize {
        let key = path.join("/");
        *self.expand_counts.lock().unwrap().get(&key).unwrap_or(&0)
    }

    /// Every statement executed, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
struct MockColumn {
    name: String,
    data_type: String,
}

#[derive(Debug, Clone)]
struct MockRelation {
    name: String,
    type_label: String,
    columns: Vec<MockColumn>,
}

#[derive(Debug, Clone)]
struct MockSchema {
    name: String,
    relations: Vec<MockRelation>,
}

#[derive(Debug, Clone)]
struct MockDatabase {
    name: String,
    schemas: Vec<MockSchema>,
}

/// A mock adapter with a small default catalog.
pub struct MockAdapter {
    databases: Vec<MockDatabase>,
    latency: Option<Duration>,
    refuse_connect: bool,
    state: Arc<MockState>,
}

impl MockAdapter {
    /// Creates a mock adapter with the default two-database catalog.
    pub fn new() -> Self {
        Self {
            databases: default_catalog(),
            latency: None,
            refuse_connect: false,
            state: Arc::new(MockState::default()),
        }
    }

    /// Injects a delay before every statement completes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Scripts an exact result for a statement (matched on trimmed text).
    pub fn with_result(self, sql: impl Into<String>, result: RowSet) -> Self {
        self.state
            .scripted
            .lock()
            .unwrap()
            .insert(sql.into().trim().to_string(), result);
        self
    }

    /// Makes every `connect` call fail.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Shared observable state, for assertions.
    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn default_catalog() -> Vec<MockDatabase> {
    vec![
        MockDatabase {
            name: "demo".to_string(),
            schemas: vec![
                MockSchema {
                    name: "analytics".to_string(),
                    relations: vec![],
                },
                MockSchema {
                    name: "main".to_string(),
                    relations: vec![MockRelation {
                        name: "drivers".to_string(),
                        type_label: "t".to_string(),
                        columns: vec![
                            MockColumn {
                                name: "id".to_string(),
                                data_type: "integer".to_string(),
                            },
                            MockColumn {
                                name: "name".to_string(),
                                data_type: "varchar".to_string(),
                            },
                            MockColumn {
                                name: "dob".to_string(),
                                data_type: "date".to_string(),
                            },
                        ],
                    }],
                },
            ],
        },
        MockDatabase {
            name: "tiny".to_string(),
            schemas: vec![],
        },
    ]
}

#[async_trait]
impl Adapter for MockAdapter {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if self.refuse_connect {
            return Err(PrismError::connection("mock adapter refused the connection"));
        }
        Ok(Arc::new(MockConnection {
            databases: self.databases.clone(),
            latency: self.latency,
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    databases: Vec<MockDatabase>,
    latency: Option<Duration>,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .databases
            .iter()
            .map(|db| CatalogEntry::database(db.name.clone()))
            .collect())
    }

    async fn expand(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        {
            let mut counts = self.state.expand_counts.lock().unwrap();
            *counts.entry(entry.path.join("/")).or_insert(0) += 1;
        }

        match entry.kind {
            CatalogKind::Database => {
                let db = self.find_database(entry)?;
                Ok(db
                    .schemas
                    .iter()
                    .map(|s| {
                        CatalogEntry::child_of(&entry.path, CatalogKind::Schema, &s.name, None)
                    })
                    .collect())
            }
            CatalogKind::Schema => {
                let schema = self.find_schema(entry)?;
                Ok(schema
                    .relations
                    .iter()
                    .map(|r| {
                        CatalogEntry::child_of(
                            &entry.path,
                            CatalogKind::Relation,
                            &r.name,
                            Some(r.type_label.clone()),
                        )
                    })
                    .collect())
            }
            CatalogKind::Relation => {
                let relation = self.find_relation(entry)?;
                Ok(relation
                    .columns
                    .iter()
                    .map(|c| {
                        CatalogEntry::child_of(
                            &entry.path,
                            CatalogKind::Column,
                            &c.name,
                            Some(c.data_type.clone()),
                        )
                    })
                    .collect())
            }
            CatalogKind::Column => Err(expansion_unsupported(entry)),
        }
    }

    async fn execute(&self, sql: &str, limit: Option<usize>) -> Result<RowSet> {
        self.state.executed.lock().unwrap().push(sql.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let trimmed = sql.trim();

        if let Some(scripted) = self.state.scripted.lock().unwrap().get(trimmed) {
            return Ok(apply_limit(scripted.clone(), limit));
        }

        let lowered = trimmed.to_lowercase();

        // Statements mentioning "sleep" hang until the caller cancels.
        if lowered.contains("sleep") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if lowered.contains("error") {
            return Err(PrismError::execution(format!(
                "mock failure while executing: {trimmed}"
            )));
        }

        if let Some(result) = parse_select_literal(trimmed) {
            return Ok(apply_limit(result, limit));
        }

        if lowered.starts_with("select") {
            let columns = vec![ColumnInfo::new("result", "text")];
            let rows = vec![vec![Value::String(format!("Mock result for: {trimmed}"))]];
            return Ok(apply_limit(RowSet::with_data(columns, rows), limit));
        }

        // Non-SELECT statements return an empty result.
        Ok(RowSet::new())
    }

    async fn stream(&self, sql: &str, _columns: Vec<ColumnInfo>) -> Result<RowStream> {
        Err(PrismError::internal(format!(
            "mock connections do not stream (statement: {sql})"
        )))
    }

    async fn cancel(&self) {
        self.state.cancel_requests.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl MockConnection {
    fn find_database(&self, entry: &CatalogEntry) -> Result<&MockDatabase> {
        self.databases
            .iter()
            .find(|db| db.name == entry.name)
            .ok_or_else(|| {
                PrismError::introspection(format!("unknown database '{}'", entry.name))
            })
    }

    fn find_schema(&self, entry: &CatalogEntry) -> Result<&MockSchema> {
        let db_name = entry.path.first().cloned().unwrap_or_default();
        self.databases
            .iter()
            .find(|db| db.name == db_name)
            .and_then(|db| db.schemas.iter().find(|s| s.name == entry.name))
            .ok_or_else(|| PrismError::introspection(format!("unknown schema '{}'", entry.name)))
    }

    fn find_relation(&self, entry: &CatalogEntry) -> Result<&MockRelation> {
        let db_name = entry.path.first().cloned().unwrap_or_default();
        let schema_name = entry.path.get(1).cloned().unwrap_or_default();
        self.databases
            .iter()
            .find(|db| db.name == db_name)
            .and_then(|db| db.schemas.iter().find(|s| s.name == schema_name))
            .and_then(|s| s.relations.iter().find(|r| r.name == entry.name))
            .ok_or_else(|| {
                PrismError::introspection(format!("unknown relation '{}'", entry.name))
            })
    }
}

/// Caps a result set at `limit` rows, marking truncation like a real backend.
fn apply_limit(mut result: RowSet, limit: Option<usize>) -> RowSet {
    if let Some(limit) = limit {
        if result.rows.len() > limit {
            result.rows.truncate(limit);
            result.truncated = true;
        }
    }
    result
}

/// Parses `select <int> [as <name>]` into a one-row result.
fn parse_select_literal(sql: &str) -> Option<RowSet> {
    let rest = sql
        .strip_prefix("select ")
        .or_else(|| sql.strip_prefix("SELECT "))?
        .trim()
        .trim_end_matches(';');

    let mut parts = rest.split_whitespace();
    let literal: i64 = parts.next()?.parse().ok()?;

    let name = match (parts.next(), parts.next()) {
        (Some(kw), Some(alias)) if kw.eq_ignore_ascii_case("as") => alias.to_string(),
        (None, None) => "value".to_string(),
        _ => return None,
    };

    Some(RowSet::with_data(
        vec![ColumnInfo::new(name, "integer")],
        vec![vec![Value::Int(literal)]],
    ))
}
