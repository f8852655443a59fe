//! Database adapter layer for Prism.
//!
//! Provides the trait-based protocol every supported backend implements:
//! connect, introspect the catalog, execute a single statement, and
//! best-effort cancel. Adapters hold no catalog or result state; everything
//! they return is plain data for the catalog model and the results store.

mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::{MockAdapter, MockState};
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;
pub use types::{ColumnInfo, Row, RowSet, RowStream, Value};

use crate::config::ConnectionConfig;
use crate::error::{PrismError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    Sqlite,
}

impl Backend {
    /// Returns the backend as a string for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend, if it is server-based.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Sqlite => 0,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// The kind of entity a catalog entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Database,
    Schema,
    Relation,
    Column,
}

impl CatalogKind {
    /// Whether entries of this kind may have children at all.
    pub fn can_have_children(&self) -> bool {
        !matches!(self, Self::Column)
    }
}

/// A plain description of one catalog entity, as reported by an adapter.
///
/// `path` holds the entity's ancestry including its own name (for example
/// `["sales", "public", "orders"]` for a relation), unescaped. The catalog
/// model derives display labels and quoted identifiers from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: CatalogKind,
    pub name: String,
    /// Short display annotation (relation kind, column type). May be empty.
    pub type_label: Option<String>,
    pub path: Vec<String>,
}

impl CatalogEntry {
    /// Creates an entry as a child of `parent_path`.
    pub fn child_of(
        parent_path: &[String],
        kind: CatalogKind,
        name: impl Into<String>,
        type_label: Option<String>,
    ) -> Self {
        let name = name.into();
        let mut path = parent_path.to_vec();
        path.push(name.clone());
        Self {
            kind,
            name,
            type_label,
            path,
        }
    }

    /// Creates a top-level database entry.
    pub fn database(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: CatalogKind::Database,
            path: vec![name.clone()],
            name,
            type_label: None,
        }
    }
}

/// A factory for connections to one kind of backend.
///
/// Exactly one implementation exists per supported backend; the active one is
/// selected from configuration at session start, never by runtime type
/// inspection.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The backend this adapter drives.
    fn backend(&self) -> Backend;

    /// Escapes a single identifier segment for this backend.
    ///
    /// The default wraps in double quotes and doubles internal quotes, which
    /// matches every backend currently supported.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Whether connections from this adapter can re-read rows from a live
    /// cursor for export, instead of the materialized result set.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Opens a new connection to the backend described by `config`.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;
}

/// A live backend session.
///
/// All operations are async and return Results with PrismError. A session
/// owns one primary connection for execution and, where the backend allows
/// it, a second one for catalog introspection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Returns the top-level databases visible to this connection.
    ///
    /// May be partial if the backend restricts visibility.
    async fn catalog(&self) -> Result<Vec<CatalogEntry>>;

    /// Fetches one level of children for a catalog entry.
    ///
    /// Fails with an introspection error when the entry kind cannot have
    /// children; callers are expected to check `CatalogKind::can_have_children`
    /// first.
    async fn expand(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>>;

    /// Executes a single statement, suspending until the backend returns.
    ///
    /// When `limit` is set it caps the rows fetched from the backend, not
    /// merely the rows displayed.
    async fn execute(&self, sql: &str, limit: Option<usize>) -> Result<RowSet>;

    /// Opens a fresh, unlimited cursor over `sql` for export.
    ///
    /// Only called when the adapter reports `supports_streaming()`.
    async fn stream(&self, sql: &str, columns: Vec<ColumnInfo>) -> Result<RowStream>;

    /// Best-effort request that the backend abandon the in-flight statement.
    ///
    /// Idempotent; a no-op when nothing is running or the backend has no
    /// cancellation support.
    async fn cancel(&self);

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Returns the adapter for the given backend.
///
/// This is the central selection point for backend implementations.
pub fn adapter_for(backend: Backend) -> Arc<dyn Adapter> {
    match backend {
        Backend::Postgres => Arc::new(PostgresAdapter),
        Backend::Sqlite => Arc::new(SqliteAdapter),
    }
}

/// Connects to the backend named in `config` through its adapter.
pub async fn connect(config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
    adapter_for(config.backend).connect(config).await
}

pub(crate) fn expansion_unsupported(entry: &CatalogEntry) -> PrismError {
    PrismError::introspection(format!(
        "{:?} node '{}' cannot have children",
        entry.kind, entry.name
    ))
}
