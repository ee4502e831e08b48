//! Live tests against a SQL Server container.
//!
//! These need Docker and are skipped by default:
//!
//! ```bash
//! cargo test -p mssql-adapter --test live -- --ignored
//! ```

#![cfg(feature = "tds")]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mssql_adapter::{
    ConnectionConfig, ErrorKind, Footprint, Meta, NativeQuery, QueryResult, QueryType,
    compile_statement, create_manager, parse_native_query_error, parse_native_query_result,
    send_native_query,
};
use mssql_adapter_testing::MssqlContainer;
use serde_json::json;

async fn run(
    connection: &mssql_adapter::Connection,
    manager: &mssql_adapter::Manager,
    sql: &str,
) {
    send_native_query(connection, Some(manager), NativeQuery::new(sql))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_live_roundtrip() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let server = MssqlContainer::start().await.unwrap();
    let config = ConnectionConfig::from_connection_string(&server.connection_string()).unwrap();

    // The catalog is loaded at creation, so the schema must exist first.
    let bootstrap = create_manager(config.clone()).await.unwrap();
    let connection = bootstrap.get_connection().await.unwrap();
    run(
        &connection,
        &bootstrap,
        "create table books (id int identity primary key, \
         title nvarchar(50) constraint UQ_books_title unique, year int)",
    )
    .await;
    drop(connection);
    bootstrap.destroy().await;

    let manager = create_manager(config).await.unwrap();
    assert_eq!(manager.catalog().lookup("books").len(), 3);
    let connection = manager.get_connection().await.unwrap();

    let insert = compile_statement(
        &json!({"insert": {"title": "Dune", "year": 1965}, "into": "books"}),
        &Meta::default(),
    )
    .unwrap();
    let report = send_native_query(&connection, Some(&manager), insert.clone().into())
        .await
        .unwrap();
    let parsed = parse_native_query_result(QueryType::Insert, &report.result, &report.meta);
    assert!(matches!(parsed.result, QueryResult::Inserted { .. }));

    let err = send_native_query(&connection, Some(&manager), insert.into())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert_eq!(
        parse_native_query_error(&err, &Meta::default()).footprint,
        Footprint::NotUnique {
            keys: vec!["UQ_books_title".into()]
        }
    );

    let count = compile_statement(
        &json!({"count": "id", "from": "books", "where": {"year": {"<": 2000}}}),
        &Meta::default(),
    )
    .unwrap();
    let report = send_native_query(&connection, Some(&manager), count.into())
        .await
        .unwrap();
    let parsed = parse_native_query_result(QueryType::Count, &report.result, &report.meta);
    assert_eq!(parsed.result, QueryResult::Scalar(1.0));

    drop(connection);
    manager.destroy().await;
}
