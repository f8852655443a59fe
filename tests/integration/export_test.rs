//! Export tests through the session facade.

use std::sync::Arc;

use prism::adapter::{ColumnInfo, MockAdapter, RowSet, Value};
use prism::config::{ConnectionConfig, SessionConfig};
use prism::error::PrismError;
use prism::export::{read_columnar, ExportFormat};
use prism::session::Session;

async fn session_with(adapter: MockAdapter) -> Session {
    Session::connect_with(
        Arc::new(adapter),
        &ConnectionConfig::default(),
        &SessionConfig::default(),
    )
    .await
    .unwrap()
}

fn empty_result() -> RowSet {
    RowSet::with_data(
        vec![
            ColumnInfo::new("id", "integer"),
            ColumnInfo::new("label", "varchar"),
        ],
        vec![],
    )
}

#[tokio::test]
async fn test_export_each_format() {
    let mut session = session_with(MockAdapter::new()).await;
    let dir = tempfile::tempdir().unwrap();

    session
        .submit_query("select 9 as answer", None, false)
        .await
        .unwrap();
    session.wait_for_run().await;

    let csv_path = dir.path().join("answer.csv");
    assert_eq!(
        session.export(0, &csv_path).await.unwrap(),
        ExportFormat::Csv
    );
    assert_eq!(
        std::fs::read_to_string(&csv_path).unwrap(),
        "answer\n9\n"
    );

    let json_path = dir.path().join("answer.json");
    assert_eq!(
        session.export(0, &json_path).await.unwrap(),
        ExportFormat::Json
    );
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed, serde_json::json!([{"answer": 9}]));

    let bin_path = dir.path().join("answer.bin");
    assert_eq!(
        session.export(0, &bin_path).await.unwrap(),
        ExportFormat::ColumnarBinary
    );
    let document = read_columnar(&bin_path).unwrap();
    assert_eq!(document.columns[0].name, "answer");
    assert_eq!(document.column_data[0], vec![Value::Int(9)]);
}

#[tokio::test]
async fn test_export_zero_rows_is_valid_everywhere() {
    let adapter = MockAdapter::new().with_result("select * from empty", empty_result());
    let mut session = session_with(adapter).await;
    let dir = tempfile::tempdir().unwrap();

    session
        .submit_query("select * from empty", None, false)
        .await
        .unwrap();
    session.wait_for_run().await;

    let csv_path = dir.path().join("empty.csv");
    session.export(0, &csv_path).await.unwrap();
    assert_eq!(std::fs::read_to_string(&csv_path).unwrap(), "id,label\n");

    let json_path = dir.path().join("empty.json");
    session.export(0, &json_path).await.unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed, serde_json::json!([]));

    let bin_path = dir.path().join("empty.bin");
    session.export(0, &bin_path).await.unwrap();
    let document = read_columnar(&bin_path).unwrap();
    assert_eq!(document.columns.len(), 2);
    assert!(document.column_data.iter().all(|column| column.is_empty()));
}

#[tokio::test]
async fn test_export_rejects_unknown_extension() {
    let mut session = session_with(MockAdapter::new()).await;
    let dir = tempfile::tempdir().unwrap();

    session
        .submit_query("select 1", None, false)
        .await
        .unwrap();
    session.wait_for_run().await;

    let result = session.export(0, &dir.path().join("out.parquet")).await;
    assert!(matches!(result, Err(PrismError::UnsupportedFormat(_))));

    // The store contents are unaffected by the failed export.
    assert_eq!(session.results().read().unwrap().len(), 1);
}

#[tokio::test]
async fn test_export_second_statement_of_request() {
    let mut session = session_with(MockAdapter::new()).await;
    let dir = tempfile::tempdir().unwrap();

    session
        .submit_query("select 1 as a; select 2 as b", None, true)
        .await
        .unwrap();
    session.wait_for_run().await;

    let path = dir.path().join("b.csv");
    session.export(1, &path).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "b\n2\n");
}
