//! Execution semantics tests.
//!
//! Covers run_all behavior, row limits, run-to-first-failure, and the
//! generation guarantee under superseding requests.

use std::sync::Arc;
use std::time::Duration;

use prism::adapter::{ColumnInfo, MockAdapter, RowSet, Value};
use prism::config::{ConnectionConfig, SessionConfig};
use prism::runner::RunState;
use prism::session::Session;

async fn mock_session(adapter: MockAdapter) -> Session {
    Session::connect_with(
        Arc::new(adapter),
        &ConnectionConfig::default(),
        &SessionConfig::default(),
    )
    .await
    .unwrap()
}

fn wide_result(rows: i64) -> RowSet {
    RowSet::with_data(
        vec![ColumnInfo::new("n", "integer")],
        (0..rows).map(|i| vec![Value::Int(i)]).collect(),
    )
}

#[tokio::test]
async fn test_run_all_false_executes_first_statement_only() {
    let mut session = mock_session(MockAdapter::new()).await;

    session
        .submit_query("select 1; select 2", None, false)
        .await
        .unwrap()
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.row_set(0).unwrap().rows, vec![vec![Value::Int(1)]]);
    assert!(store.entry(1).is_none());
}

#[tokio::test]
async fn test_run_all_true_executes_in_order() {
    let mut session = mock_session(MockAdapter::new()).await;

    session
        .submit_query("select 1; select 2", None, true)
        .await
        .unwrap()
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.row_set(0).unwrap().rows, vec![vec![Value::Int(1)]]);
    assert_eq!(store.row_set(1).unwrap().rows, vec![vec![Value::Int(2)]]);
    assert_eq!(store.indices().collect::<Vec<_>>(), vec![0, 1]);
}

#[tokio::test]
async fn test_limit_caps_rows_and_marks_truncation() {
    let adapter = MockAdapter::new().with_result("select * from wide", wide_result(100));
    let mut session = mock_session(adapter).await;

    // More rows than the limit: exactly the limit, truncated.
    session
        .submit_query("select * from wide", Some(10), true)
        .await
        .unwrap();
    session.wait_for_run().await;
    {
        let store = session.results();
        let store = store.read().unwrap();
        let result = store.row_set(0).unwrap();
        assert_eq!(result.rows.len(), 10);
        assert!(result.truncated);
    }

    // As many rows as the limit: everything, not truncated.
    session
        .submit_query("select * from wide", Some(100), true)
        .await
        .unwrap();
    session.wait_for_run().await;
    {
        let store = session.results();
        let store = store.read().unwrap();
        let result = store.row_set(0).unwrap();
        assert_eq!(result.rows.len(), 100);
        assert!(!result.truncated);
    }

    // No limit at all.
    session
        .submit_query("select * from wide", None, true)
        .await
        .unwrap();
    session.wait_for_run().await;
    {
        let store = session.results();
        let store = store.read().unwrap();
        let result = store.row_set(0).unwrap();
        assert_eq!(result.rows.len(), 100);
        assert!(!result.truncated);
    }
}

#[tokio::test]
async fn test_default_limit_from_session_config() {
    let adapter = MockAdapter::new().with_result("select * from wide", wide_result(100));
    let mut session = Session::connect_with(
        Arc::new(adapter),
        &ConnectionConfig::default(),
        &SessionConfig {
            default_limit: Some(25),
            ..SessionConfig::default()
        },
    )
    .await
    .unwrap();

    session
        .submit_query("select * from wide", None, true)
        .await
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    let result = store.row_set(0).unwrap();
    assert_eq!(result.rows.len(), 25);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_first_failure_halts_the_request() {
    let mut session = mock_session(MockAdapter::new()).await;
    let mut events = session.take_events().unwrap();

    session
        .submit_query("select 1; select error; select 3", None, true)
        .await
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    // The statement before the failure keeps its rows; the failing one has
    // an error entry; the one after was never attempted.
    assert_eq!(store.len(), 2);
    assert!(store.row_set(0).is_some());
    assert_eq!(store.error(1).unwrap().statement_index, 1);
    assert!(store.entry(2).is_none());

    let mut saw_error = false;
    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            prism::session::SessionEvent::ResultError {
                statement_index, ..
            } => {
                assert_eq!(statement_index, 1);
                saw_error = true;
            }
            prism::session::SessionEvent::RunStateChanged { state, .. } => {
                if state == RunState::Failed {
                    saw_failed = true;
                }
            }
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(saw_failed);
}

#[tokio::test]
async fn test_superseding_request_discards_older_generation() {
    let adapter = MockAdapter::new().with_latency(Duration::from_secs(30));
    let state = adapter.state();
    let mut session = mock_session(adapter).await;

    let first = session
        .submit_query("select 1", None, true)
        .await
        .unwrap()
        .unwrap();

    // Submit B before A's worker has acknowledged cancellation. submit_query
    // cancels A and awaits its worker first, so B can never race A on the
    // connection, and nothing written under A's generation stays observable.
    let second = session
        .submit_query("select 2 as fast", None, true)
        .await
        .unwrap()
        .unwrap();
    assert!(second > first);
    assert_eq!(state.cancel_requests(), 1);

    {
        let store = session.results();
        let store = store.read().unwrap();
        assert_eq!(store.generation(), second);
        assert!(store.is_empty());
    }

    // B is still the slow adapter; cancel it and confirm no entries leak in.
    session.cancel_current().await;
    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.generation(), second);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_cancel_keeps_already_completed_statements() {
    let mut session = mock_session(MockAdapter::new()).await;

    // First statement commits immediately; the second hangs until cancelled.
    session
        .submit_query("select 1; select sleep_forever", None, true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel_current().await;

    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.row_set(0).unwrap().rows, vec![vec![Value::Int(1)]]);
    assert_eq!(session.observe_run_state(), RunState::Cancelled);
    assert_eq!(session.observe_run_state(), RunState::Idle);
}

#[tokio::test]
async fn test_discard_policy_drops_partial_results_on_cancel() {
    let mut session = Session::connect_with(
        Arc::new(MockAdapter::new()),
        &ConnectionConfig::default(),
        &SessionConfig {
            retain_cancelled_results: false,
            ..SessionConfig::default()
        },
    )
    .await
    .unwrap();

    session
        .submit_query("select 1; select sleep_forever", None, true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel_current().await;

    assert!(session.results().read().unwrap().is_empty());
}

#[tokio::test]
async fn test_catalog_expands_while_a_query_runs() {
    let adapter = MockAdapter::new().with_latency(Duration::from_secs(30));
    let mut session = mock_session(adapter).await;

    session
        .submit_query("select 1", None, true)
        .await
        .unwrap();

    // The introspection connection is distinct from the execution one, so
    // expansion proceeds while the query is still in flight.
    let demo = session.catalog().roots()[0];
    let children = session.expand_node(demo).await.unwrap();
    assert_eq!(children.len(), 2);

    session.cancel_current().await;
}
