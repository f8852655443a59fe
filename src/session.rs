//! Workbench session facade.
//!
//! Wires one backend connection pair (execution + introspection) to the
//! catalog model, the query runner, the results store, and the export
//! writer. This is the entire surface the presentation layer consumes:
//! submit/cancel/expand/export inbound, a `SessionEvent` channel outbound.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::adapter::{adapter_for, Adapter, Connection};
use crate::catalog::{CatalogTree, NodeId};
use crate::config::{ConnectionConfig, SessionConfig};
use crate::error::{PrismError, Result};
use crate::export::{self, ExportFormat};
use crate::results::ResultsStore;
use crate::runner::{ExecutionRequest, QueryRunner, RunState};
use crate::splitter::split_statements;

/// Outbound notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A statement's rows are committed and readable from the store.
    ResultReady { generation: u64, statement_index: usize },
    /// A statement failed; later statements of the request were skipped.
    ResultError {
        generation: u64,
        statement_index: usize,
        message: String,
    },
    /// The runner entered a new state for the given request generation.
    RunStateChanged { generation: u64, state: RunState },
    /// A catalog node's children or expansion state changed.
    CatalogUpdated { node: NodeId },
}

/// An interactive workbench session over one backend.
pub struct Session {
    adapter: Arc<dyn Adapter>,
    connection: Arc<dyn Connection>,
    introspection: Arc<dyn Connection>,
    catalog: CatalogTree,
    runner: QueryRunner,
    store: Arc<RwLock<ResultsStore>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    default_limit: Option<usize>,
}

impl Session {
    /// Connects to the backend named in `config` and builds the session.
    pub async fn connect(
        config: &ConnectionConfig,
        session_config: &SessionConfig,
    ) -> Result<Self> {
        let adapter = adapter_for(config.backend);
        Self::connect_with(adapter, config, session_config).await
    }

    /// Builds a session over an explicit adapter (used with mock backends).
    pub async fn connect_with(
        adapter: Arc<dyn Adapter>,
        config: &ConnectionConfig,
        session_config: &SessionConfig,
    ) -> Result<Self> {
        let connection = adapter.connect(config).await?;

        // Catalog introspection gets its own read connection where the
        // backend allows one, so expansion never contends with an active
        // execution. Otherwise it shares the primary connection.
        let introspection = match adapter.connect(config).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("No separate introspection connection: {e}");
                connection.clone()
            }
        };

        let catalog = CatalogTree::load(introspection.as_ref(), adapter.as_ref()).await?;
        info!(
            "Connected to {} with {} top-level catalog nodes",
            config.display_string(),
            catalog.roots().len()
        );

        let store = Arc::new(RwLock::new(ResultsStore::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let runner = QueryRunner::new(connection.clone(), store.clone(), events_tx.clone())
            .with_timeout(session_config.statement_timeout())
            .with_retain_cancelled(session_config.retain_cancelled_results);

        Ok(Self {
            adapter,
            connection,
            introspection,
            catalog,
            runner,
            store,
            events_tx,
            events_rx: Some(events_rx),
            default_limit: session_config.default_limit,
        })
    }

    /// Splits `text` and submits the resulting statements for execution.
    ///
    /// Returns the generation of the new run, or `None` when the text holds
    /// no statements (nothing executes and no result entries appear). An
    /// active run is cancelled and awaited before the new one starts.
    pub async fn submit_query(
        &mut self,
        text: &str,
        limit: Option<usize>,
        run_all: bool,
    ) -> Result<Option<u64>> {
        let statements = split_statements(text);
        if statements.is_empty() {
            return Ok(None);
        }

        let limit = limit.or(self.default_limit);
        Ok(self
            .runner
            .submit(ExecutionRequest {
                statements,
                limit,
                run_all,
            })
            .await)
    }

    /// Cancels the active run, if any, waiting for its worker to stop.
    pub async fn cancel_current(&mut self) {
        self.runner.cancel_current().await;
    }

    /// Waits for the active run to finish without cancelling it.
    pub async fn wait_for_run(&mut self) {
        self.runner.join().await;
    }

    /// The current run state; a terminal state resets to `Idle` once read.
    pub fn observe_run_state(&self) -> RunState {
        self.runner.observe_state()
    }

    /// Expands a catalog node, fetching children on first expansion.
    pub async fn expand_node(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let children = self
            .catalog
            .expand(id, self.introspection.as_ref(), self.adapter.as_ref())
            .await?;
        let _ = self.events_tx.send(SessionEvent::CatalogUpdated { node: id });
        Ok(children)
    }

    /// Collapses a catalog node, keeping its cached children.
    pub fn collapse_node(&mut self, id: NodeId) {
        self.catalog.collapse(id);
        let _ = self.events_tx.send(SessionEvent::CatalogUpdated { node: id });
    }

    /// Rebuilds the catalog from the backend, preserving expansion state.
    pub async fn refresh_catalog(&mut self) -> Result<()> {
        self.catalog
            .refresh(self.introspection.as_ref(), self.adapter.as_ref())
            .await?;
        for root in self.catalog.roots().to_vec() {
            let _ = self
                .events_tx
                .send(SessionEvent::CatalogUpdated { node: root });
        }
        Ok(())
    }

    /// The catalog tree, for display.
    pub fn catalog(&self) -> &CatalogTree {
        &self.catalog
    }

    /// Read access to the results store.
    ///
    /// Reads during an active run see only already-committed statement
    /// entries.
    pub fn results(&self) -> Arc<RwLock<ResultsStore>> {
        self.store.clone()
    }

    /// Takes the outbound event receiver. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Exports a statement's full result to `path`, format by extension.
    ///
    /// Where the adapter supports streaming, rows are re-read from a fresh
    /// backend cursor so the export is not capped by the display limit;
    /// otherwise the materialized result set is written.
    pub async fn export(&mut self, statement_index: usize, path: &Path) -> Result<ExportFormat> {
        let (sql, columns) = {
            let store = self.store.read().unwrap();
            let entry = store.entry(statement_index).ok_or_else(|| {
                PrismError::internal(format!("no result stored for statement {statement_index}"))
            })?;
            match store.row_set(statement_index) {
                Some(row_set) => (entry.sql.clone(), row_set.columns.clone()),
                None => {
                    return Err(PrismError::internal(format!(
                        "statement {statement_index} failed; there is nothing to export"
                    )))
                }
            }
        };

        let stream = if self.adapter.supports_streaming() {
            self.connection.stream(&sql, columns).await?
        } else {
            self.store
                .read()
                .unwrap()
                .export_rows(statement_index)
                .ok_or_else(|| {
                    PrismError::internal(format!(
                        "result for statement {statement_index} disappeared during export"
                    ))
                })?
        };

        export::write_rows(path, stream).await
    }

    /// Tears the session down, cancelling any active run and closing both
    /// connections.
    pub async fn close(mut self) -> Result<()> {
        self.runner.cancel_current().await;
        if !Arc::ptr_eq(&self.connection, &self.introspection) {
            self.introspection.close().await?;
        }
        self.connection.close().await?;
        Ok(())
    }
}
