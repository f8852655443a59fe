//! Catalog hierarchy tests against the mock adapter.
//!
//! Exercises lazy expansion, identifier derivation, memoization, and error
//! scoping through the session facade.

use std::sync::Arc;

use prism::adapter::{CatalogKind, MockAdapter};
use prism::config::{ConnectionConfig, SessionConfig};
use prism::error::PrismError;
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

#[tokio::test]
async fn test_roots_are_databases() {
    let session = mock_session(MockAdapter::new()).await;
    let catalog = session.catalog();

    let labels: Vec<&str> = catalog
        .roots()
        .iter()
        .map(|id| catalog.node(*id).unwrap().label.as_str())
        .collect();
    assert_eq!(labels, vec!["demo", "tiny"]);

    for id in catalog.roots() {
        let node = catalog.node(*id).unwrap();
        assert_eq!(node.kind(), CatalogKind::Database);
        assert!(!node.is_expanded);
        assert!(node.children().is_none());
    }
}

#[tokio::test]
async fn test_identifier_derivation_down_to_columns() {
    let mut session = mock_session(MockAdapter::new()).await;
    let demo = session.catalog().roots()[0];

    let schemas = session.expand_node(demo).await.unwrap();
    let main = schemas[1];
    assert_eq!(
        session.catalog().node(main).unwrap().qualified_identifier,
        "\"demo\".\"main\""
    );
    assert_eq!(
        session.catalog().node(main).unwrap().query_name,
        "\"demo\".\"main\""
    );

    let relations = session.expand_node(main).await.unwrap();
    let drivers = relations[0];
    assert_eq!(
        session.catalog().node(drivers).unwrap().qualified_identifier,
        "\"demo\".\"main\".\"drivers\""
    );
    assert_eq!(
        session.catalog().node(drivers).unwrap().query_name,
        "\"drivers\""
    );

    let columns = session.expand_node(drivers).await.unwrap();
    let dob = columns[2];
    let node = session.catalog().node(dob).unwrap();
    assert_eq!(
        node.qualified_identifier,
        "\"demo\".\"main\".\"drivers\".\"dob\""
    );
    assert_eq!(node.query_name, "\"dob\"");
    assert_eq!(node.type_label.as_deref(), Some("date"));
}

#[tokio::test]
async fn test_children_fetched_at_most_once() {
    let adapter = MockAdapter::new();
    let state = adapter.state();
    let mut session = mock_session(adapter).await;
    let demo = session.catalog().roots()[0];

    session.expand_node(demo).await.unwrap();
    session.collapse_node(demo);
    session.expand_node(demo).await.unwrap();
    session.collapse_node(demo);
    session.expand_node(demo).await.unwrap();

    // Three expansions, one introspection call.
    assert_eq!(state.expand_count(&["demo"]), 1);
    assert!(session.catalog().node(demo).unwrap().is_expanded);
}

#[tokio::test]
async fn test_empty_expansion_is_recorded_not_requeried() {
    let adapter = MockAdapter::new();
    let state = adapter.state();
    let mut session = mock_session(adapter).await;
    let tiny = session.catalog().roots()[1];

    let children = session.expand_node(tiny).await.unwrap();
    assert!(children.is_empty());
    assert_eq!(session.catalog().node(tiny).unwrap().children(), Some(&[][..]));

    session.expand_node(tiny).await.unwrap();
    assert_eq!(state.expand_count(&["tiny"]), 1);
}

#[tokio::test]
async fn test_expanding_a_column_fails_cleanly() {
    let mut session = mock_session(MockAdapter::new()).await;
    let demo = session.catalog().roots()[0];
    let schemas = session.expand_node(demo).await.unwrap();
    let relations = session.expand_node(schemas[1]).await.unwrap();
    let columns = session.expand_node(relations[0]).await.unwrap();

    let result = session.expand_node(columns[0]).await;
    assert!(matches!(result, Err(PrismError::Introspection(_))));

    // The parent's child list is unchanged by the failed expansion.
    let parent = session.catalog().node(relations[0]).unwrap();
    assert_eq!(parent.children().unwrap(), &columns[..]);
}

#[tokio::test]
async fn test_refresh_preserves_expansion_state() {
    let mut session = mock_session(MockAdapter::new()).await;
    let demo = session.catalog().roots()[0];
    let schemas = session.expand_node(demo).await.unwrap();
    session.expand_node(schemas[1]).await.unwrap();

    session.refresh_catalog().await.unwrap();

    let catalog = session.catalog();
    let demo = catalog.roots()[0];
    assert!(catalog.node(demo).unwrap().is_expanded);

    let expanded_labels: Vec<String> = catalog
        .node(demo)
        .unwrap()
        .children()
        .unwrap()
        .iter()
        .filter(|id| catalog.node(**id).unwrap().is_expanded)
        .map(|id| catalog.node(*id).unwrap().label.clone())
        .collect();
    assert_eq!(expanded_labels, vec!["main".to_string()]);
}
