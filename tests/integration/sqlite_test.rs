//! End-to-end tests against a temporary SQLite database.

use prism::adapter::{CatalogKind, Value};
use prism::config::{ConnectionConfig, SessionConfig};
use prism::error::PrismError;
use prism::session::Session;

async fn sqlite_session() -> (tempfile::TempDir, Session) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workbench.db");
    std::fs::File::create(&path).unwrap();

    let config = ConnectionConfig {
        backend: prism::adapter::Backend::Sqlite,
        path: Some(path),
        ..ConnectionConfig::default()
    };

    let session = Session::connect(&config, &SessionConfig::default())
        .await
        .unwrap();
    (dir, session)
}

#[tokio::test]
async fn test_multi_statement_script_runs_in_order() {
    let (_dir, mut session) = sqlite_session().await;

    session
        .submit_query(
            "create table drivers (id integer, name text);\n\
             insert into drivers values (1, 'Ada');\n\
             insert into drivers values (2, 'Grace');\n\
             select id, name from drivers order by id",
            None,
            true,
        )
        .await
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.len(), 4);

    let result = store.row_set(3).unwrap();
    assert_eq!(result.columns[0].name, "id");
    assert_eq!(result.columns[1].name, "name");
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Int(1), Value::String("Ada".into())],
            vec![Value::Int(2), Value::String("Grace".into())],
        ]
    );
}

#[tokio::test]
async fn test_failure_mid_script_keeps_prior_results() {
    let (_dir, mut session) = sqlite_session().await;

    session
        .submit_query(
            "create table t (x integer); select * from missing_table; select 1",
            None,
            true,
        )
        .await
        .unwrap();
    session.wait_for_run().await;

    let store = session.results();
    let store = store.read().unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.row_set(0).is_some());
    assert!(store
        .error(1)
        .unwrap()
        .message
        .contains("missing_table"));
    assert!(store.entry(2).is_none());
}

#[tokio::test]
async fn test_catalog_has_no_schema_level() {
    let (_dir, mut session) = sqlite_session().await;

    session
        .submit_query(
            "create table people (id integer, email text); create view adults as select * from people",
            None,
            true,
        )
        .await
        .unwrap();
    session.wait_for_run().await;
    session.refresh_catalog().await.unwrap();

    let roots = session.catalog().roots().to_vec();
    assert_eq!(roots.len(), 1);
    assert_eq!(session.catalog().node(roots[0]).unwrap().label, "main");

    // Databases expand straight into relations on this backend.
    let relations = session.expand_node(roots[0]).await.unwrap();
    let labels: Vec<(String, Option<String>, CatalogKind)> = relations
        .iter()
        .map(|id| {
            let node = session.catalog().node(*id).unwrap();
            (node.label.clone(), node.type_label.clone(), node.kind())
        })
        .collect();
    assert_eq!(
        labels,
        vec![
            (
                "adults".to_string(),
                Some("v".to_string()),
                CatalogKind::Relation
            ),
            (
                "people".to_string(),
                Some("t".to_string()),
                CatalogKind::Relation
            ),
        ]
    );

    let columns = session.expand_node(relations[1]).await.unwrap();
    let email = session.catalog().node(columns[1]).unwrap();
    assert_eq!(email.qualified_identifier, "\"main\".\"people\".\"email\"");
    assert_eq!(email.query_name, "\"email\"");

    let result = session.expand_node(columns[1]).await;
    assert!(matches!(result, Err(PrismError::Introspection(_))));
}

#[tokio::test]
async fn test_limit_and_export_csv() -> anyhow::Result<()> {
    let (_dir, mut session) = sqlite_session().await;
    let out_dir = tempfile::tempdir()?;

    let mut script = String::from("create table nums (n integer);\n");
    for i in 0..20 {
        script.push_str(&format!("insert into nums values ({i});\n"));
    }
    session.submit_query(&script, None, true).await?;
    session.wait_for_run().await;

    session
        .submit_query("select n from nums order by n", Some(5), true)
        .await?;
    session.wait_for_run().await;

    {
        let store = session.results();
        let store = store.read().unwrap();
        let result = store.row_set(0).unwrap();
        assert_eq!(result.rows.len(), 5);
        assert!(result.truncated);
    }

    // SQLite has no cursor streaming; the export writes the materialized
    // (limited) result set.
    let path = out_dir.path().join("nums.csv");
    session.export(0, &path).await?;
    assert_eq!(std::fs::read_to_string(&path)?, "n\n0\n1\n2\n3\n4\n");
    Ok(())
}
