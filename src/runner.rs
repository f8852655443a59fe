//! Sequential query execution with cancellation and generation tracking.
//!
//! The runner owns the primary backend connection for execution. At most one
//! worker task runs at a time: submitting a new request while one is active
//! first cancels the current run and awaits its worker before starting the
//! next, so two executions can never race on the same connection. Every
//! result write is stamped with the generation of the request that produced
//! it and checked against the store at write time, which makes stale results
//! from a superseded run unobservable regardless of how promptly the backend
//! honored cancellation.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{Connection, RowSet};
use crate::error::{PrismError, Result};
use crate::results::{ErrorResult, ResultsStore, StatementOutcome};
use crate::session::SessionEvent;
use crate::splitter::Statement;

/// A request to execute one or many statements.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Ordered statements, as produced by the splitter.
    pub statements: Vec<Statement>,
    /// Optional cap on rows fetched per statement.
    pub limit: Option<usize>,
    /// When false, only the first statement executes.
    pub run_all: bool,
}

/// Observable state of the runner.
///
/// Terminal states reset to `Idle` once observed through
/// [`QueryRunner::observe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Orchestrates sequential statement execution against one connection.
pub struct QueryRunner {
    connection: Arc<dyn Connection>,
    store: Arc<RwLock<ResultsStore>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<Mutex<RunState>>,
    next_generation: u64,
    current: Option<ActiveRun>,
    timeout: Option<Duration>,
    retain_cancelled: bool,
}

impl QueryRunner {
    /// Creates a runner over the given connection and store.
    pub fn new(
        connection: Arc<dyn Connection>,
        store: Arc<RwLock<ResultsStore>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            connection,
            store,
            events,
            state: Arc::new(Mutex::new(RunState::Idle)),
            next_generation: 0,
            current: None,
            timeout: None,
            retain_cancelled: true,
        }
    }

    /// Sets the per-statement timeout, which rides the cancellation path.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether a cancelled run keeps already-completed results.
    pub fn with_retain_cancelled(mut self, retain: bool) -> Self {
        self.retain_cancelled = retain;
        self
    }

    /// The generation of the most recent request, if any has been submitted.
    pub fn current_generation(&self) -> u64 {
        self.next_generation
    }

    /// Submits a request, superseding any active run.
    ///
    /// If a run is active it is cancelled and its worker awaited first, so
    /// at most one execution is ever in flight on the connection. Returns
    /// the generation of the new run, or `None` for an empty statement list
    /// (a no-op: nothing executes, no result entries appear).
    pub async fn submit(&mut self, request: ExecutionRequest) -> Option<u64> {
        if request.statements.is_empty() {
            debug!("Ignoring request with no statements");
            return None;
        }

        self.cancel_current().await;

        self.next_generation += 1;
        let generation = self.next_generation;

        self.store.write().unwrap().begin_generation(generation);
        *self.state.lock().unwrap() = RunState::Running;
        let _ = self.events.send(SessionEvent::RunStateChanged {
            generation,
            state: RunState::Running,
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_worker(WorkerContext {
            connection: self.connection.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
            generation,
            request,
            timeout: self.timeout,
            retain_cancelled: self.retain_cancelled,
        }));

        self.current = Some(ActiveRun {
            generation,
            cancel,
            task,
        });

        Some(generation)
    }

    /// Cancels the active run, if any, and waits for its worker to stop.
    ///
    /// A cancel that arrives after the run already finished is a no-op, not
    /// an error: the worker is simply joined and its terminal state stands.
    pub async fn cancel_current(&mut self) {
        let Some(run) = self.current.take() else {
            return;
        };

        if !run.task.is_finished() {
            debug!("Cancelling run generation {}", run.generation);
            run.cancel.cancel();
            // Advisory backend-side cancel; authority stays with the
            // generation stamp either way.
            self.connection.cancel().await;
        }

        if let Err(e) = run.task.await {
            warn!("Execution worker for generation {} panicked: {e}", run.generation);
        }
    }

    /// Waits for the active run to finish without cancelling it.
    pub async fn join(&mut self) {
        if let Some(run) = self.current.take() {
            if let Err(e) = run.task.await {
                warn!("Execution worker for generation {} panicked: {e}", run.generation);
            }
        }
    }

    /// Returns the current run state, resetting a terminal state to `Idle`.
    pub fn observe_state(&self) -> RunState {
        let mut state = self.state.lock().unwrap();
        let observed = *state;
        if observed.is_terminal() {
            *state = RunState::Idle;
        }
        observed
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == RunState::Running
    }
}

struct WorkerContext {
    connection: Arc<dyn Connection>,
    store: Arc<RwLock<ResultsStore>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<Mutex<RunState>>,
    cancel: CancellationToken,
    generation: u64,
    request: ExecutionRequest,
    timeout: Option<Duration>,
    retain_cancelled: bool,
}

/// Executes the request's statements strictly in order.
///
/// Explicit fold with early exit: the first failing statement terminates the
/// run as `Failed`, keeping results committed before it and never attempting
/// the statements after it.
async fn run_worker(ctx: WorkerContext) {
    let WorkerContext {
        connection,
        store,
        events,
        state,
        cancel,
        generation,
        request,
        timeout,
        retain_cancelled,
    } = ctx;

    let count = if request.run_all {
        request.statements.len()
    } else {
        1
    };

    let mut terminal = RunState::Completed;

    for (index, statement) in request.statements.into_iter().take(count).enumerate() {
        if cancel.is_cancelled() {
            terminal = RunState::Cancelled;
            break;
        }

        match execute_one(&*connection, &statement.text, request.limit, &cancel, timeout).await {
            StatementRun::Finished(Ok(rows)) => {
                let accepted = store.write().unwrap().commit(
                    generation,
                    index,
                    statement.text,
                    StatementOutcome::RowSet(rows),
                );
                if accepted {
                    let _ = events.send(SessionEvent::ResultReady {
                        generation,
                        statement_index: index,
                    });
                } else {
                    // Superseded while executing; stop without touching
                    // the newer generation's entries.
                    terminal = RunState::Cancelled;
                    break;
                }
            }
            StatementRun::Finished(Err(error)) => {
                let message = match error {
                    PrismError::Execution(message) => message,
                    other => other.to_string(),
                };
                store.write().unwrap().commit(
                    generation,
                    index,
                    statement.text,
                    StatementOutcome::Error(ErrorResult {
                        message: message.clone(),
                        statement_index: index,
                    }),
                );
                let _ = events.send(SessionEvent::ResultError {
                    generation,
                    statement_index: index,
                    message,
                });
                terminal = RunState::Failed;
                break;
            }
            StatementRun::Cancelled => {
                terminal = RunState::Cancelled;
                break;
            }
        }
    }

    if terminal == RunState::Cancelled && !retain_cancelled {
        store.write().unwrap().discard_generation(generation);
    }

    *state.lock().unwrap() = terminal;
    let _ = events.send(SessionEvent::RunStateChanged {
        generation,
        state: terminal,
    });
}

enum StatementRun {
    Finished(Result<RowSet>),
    Cancelled,
}

/// Runs one statement, racing it against cancellation and the timeout.
///
/// A timeout triggers the same path as a user cancel: the backend is asked
/// to abandon the statement and the run's token is fired.
async fn execute_one(
    connection: &dyn Connection,
    sql: &str,
    limit: Option<usize>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> StatementRun {
    let execute = connection.execute(sql, limit);
    tokio::pin!(execute);

    match timeout {
        Some(timeout) => {
            tokio::select! {
                result = &mut execute => StatementRun::Finished(result),
                _ = cancel.cancelled() => StatementRun::Cancelled,
                _ = tokio::time::sleep(timeout) => {
                    warn!("Statement exceeded timeout of {timeout:?}, cancelling");
                    connection.cancel().await;
                    cancel.cancel();
                    StatementRun::Cancelled
                }
            }
        }
        None => {
            tokio::select! {
                result = &mut execute => StatementRun::Finished(result),
                _ = cancel.cancelled() => StatementRun::Cancelled,
            }
        }
    }
}
