//! Result storage for executed statements.
//!
//! Holds, per executed statement, either a materialized row set or the error
//! that stopped it, keyed by statement index within the owning request. The
//! query runner is the only writer; every write carries the generation it
//! belongs to and stale writes are refused, so results from a superseded run
//! can never surface.

use std::collections::BTreeMap;

use crate::adapter::{Row, RowSet, RowStream};

/// The error produced by one failed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResult {
    /// Backend error message.
    pub message: String,
    /// Index of the failing statement within its request.
    pub statement_index: usize,
}

/// Outcome of one executed statement.
#[derive(Debug, Clone)]
pub enum StatementOutcome {
    RowSet(RowSet),
    Error(ErrorResult),
}

/// A committed store entry: the statement text plus its outcome.
#[derive(Debug, Clone)]
pub struct StoredResult {
    /// The statement text as executed.
    pub sql: String,
    /// What the statement produced.
    pub outcome: StatementOutcome,
}

/// Per-session store of statement results for the current request.
#[derive(Debug, Default)]
pub struct ResultsStore {
    generation: u64,
    entries: BTreeMap<usize, StoredResult>,
}

impl ResultsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation the store currently accepts writes for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a new request generation, clearing results of the previous one.
    pub fn begin_generation(&mut self, generation: u64) {
        self.generation = generation;
        self.entries.clear();
    }

    /// Commits an outcome for a statement, refusing stale generations.
    ///
    /// Returns whether the write was accepted. The check happens at write
    /// time, so a worker that outlives its cancellation cannot overwrite a
    /// newer run's results.
    pub fn commit(
        &mut self,
        generation: u64,
        statement_index: usize,
        sql: String,
        outcome: StatementOutcome,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.entries
            .insert(statement_index, StoredResult { sql, outcome });
        true
    }

    /// Drops all entries of `generation` if it is still current.
    ///
    /// Used by the discard-on-cancel policy.
    pub fn discard_generation(&mut self, generation: u64) {
        if generation == self.generation {
            self.entries.clear();
        }
    }

    /// Number of committed statement entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Committed statement indices, in display order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    /// The full entry for a statement, if committed.
    pub fn entry(&self, statement_index: usize) -> Option<&StoredResult> {
        self.entries.get(&statement_index)
    }

    /// The row set for a statement, if it succeeded.
    pub fn row_set(&self, statement_index: usize) -> Option<&RowSet> {
        match self.entries.get(&statement_index)?.outcome {
            StatementOutcome::RowSet(ref rows) => Some(rows),
            StatementOutcome::Error(_) => None,
        }
    }

    /// The error for a statement, if it failed.
    pub fn error(&self, statement_index: usize) -> Option<&ErrorResult> {
        match self.entries.get(&statement_index)?.outcome {
            StatementOutcome::Error(ref error) => Some(error),
            StatementOutcome::RowSet(_) => None,
        }
    }

    /// A contiguous row range for display, without copying the full set.
    ///
    /// The range is clamped to the available rows; a start past the end
    /// yields an empty slice.
    pub fn window(&self, statement_index: usize, start: usize, len: usize) -> Option<&[Row]> {
        let rows = &self.row_set(statement_index)?.rows;
        let start = start.min(rows.len());
        let end = start.saturating_add(len).min(rows.len());
        Some(&rows[start..end])
    }

    /// All rows of a statement as a stream over the materialized set.
    ///
    /// The session swaps this for a live backend cursor when the adapter
    /// supports streaming.
    pub fn export_rows(&self, statement_index: usize) -> Option<RowStream> {
        let row_set = self.row_set(statement_index)?;
        Some(RowStream::from_rows(
            row_set.columns.clone(),
            row_set.rows.clone(),
        ))
    }
}
