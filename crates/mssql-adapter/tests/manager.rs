//! Manager lifecycle tests over the scripted backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use mssql_adapter::{
    ConnectionConfig, ErrorKind, NativeError, NativeErrorKind, PoolFailure, create_manager_with,
    destroy_manager, get_connection, release_connection,
};
use mssql_adapter_testing::{MockConnector, catalog_row};
use parking_lot::Mutex;

fn config(pool_max: u32) -> ConnectionConfig {
    ConnectionConfig::default()
        .host("db.test")
        .user("sa")
        .password("secret")
        .database("library")
        .pool_max(pool_max)
}

fn library() -> MockConnector {
    MockConnector::new().with_catalog(vec![
        catalog_row("books", "id", "int", None),
        catalog_row("books", "title", "nvarchar", Some(255)),
        catalog_row("books", "year", "int", None),
        catalog_row("people", "name", "varchar", Some(10)),
    ])
}

#[tokio::test]
async fn test_create_manager_loads_catalog() {
    let connector = library();
    let manager = create_manager_with(config(3), &connector).await.unwrap();

    assert_eq!(manager.catalog().table_count(), 2);
    assert_eq!(manager.catalog().lookup("books").len(), 3);
    assert_eq!(connector.pools_created(), 3);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(connector.open_statements(), 0);
    assert_eq!(manager.status().connected(), 1);
    assert!(manager.config().options.enable_arith_abort);
}

#[tokio::test]
async fn test_create_manager_rejects_malformed_config() {
    let connector = library();
    let err = create_manager_with(config(0), &connector).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert_eq!(connector.pools_created(), 0);

    let err = create_manager_with(config(1).host(""), &connector)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
}

#[tokio::test]
async fn test_create_manager_connect_failure() {
    let connector = library();
    connector.fail_connect(Some(NativeError::new(
        NativeErrorKind::Connection,
        "Login failed for user 'sa'.",
    )));

    let err = create_manager_with(config(2), &connector).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(connector.close_count(), 2);
}

#[tokio::test]
async fn test_create_manager_catalog_failure_closes_pools() {
    let connector = library();
    connector.fail_prepare(Some(NativeError::new(
        NativeErrorKind::Prepare,
        "permission denied on INFORMATION_SCHEMA",
    )));

    let err = create_manager_with(config(2), &connector).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert!(err.to_string().contains("schema metadata"));
    assert_eq!(connector.close_count(), 2);
}

#[tokio::test]
async fn test_connections_spread_over_pools() {
    let connector = library();
    let manager = create_manager_with(config(2), &connector).await.unwrap();

    let first = manager.get_connection().await.unwrap();
    let second = manager.get_connection().await.unwrap();

    assert_eq!(first.pool_index(), 0);
    assert_eq!(second.pool_index(), 1);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(manager.status().in_use(), 2);
}

#[tokio::test]
async fn test_concurrent_get_connection_on_single_pool() {
    let connector = library();
    let manager = create_manager_with(config(1), &connector).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let manager = manager.clone();
        tasks.spawn(async move { get_connection(&manager).await });
    }

    let mut connections = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        connections.push(joined.unwrap().unwrap());
    }

    assert_eq!(connections.len(), 10);
    assert!(connections.iter().all(|c| c.pool_index() == 0));
    assert_eq!(manager.status().in_use(), 10);

    for connection in &mut connections {
        release_connection(connection, &manager).unwrap();
    }
    assert_eq!(manager.status().in_use(), 0);
    assert_eq!(manager.metrics().releases, 10);
}

#[tokio::test]
async fn test_release_is_exactly_once() {
    let connector = library();
    let manager = create_manager_with(config(1), &connector).await.unwrap();

    let mut connection = manager.get_connection().await.unwrap();
    manager.release_connection(&mut connection).unwrap();
    assert!(connection.is_released());

    let err = manager.release_connection(&mut connection).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadConnection);
    assert_eq!(manager.status().in_use(), 0);
}

#[tokio::test]
async fn test_foreign_release_leaves_pools_untouched() {
    let connector = library();
    let ours = create_manager_with(config(1), &connector).await.unwrap();
    let theirs = create_manager_with(config(1), &connector).await.unwrap();

    let mut connection = theirs.get_connection().await.unwrap();
    let before = ours.status();

    let err = ours.release_connection(&mut connection).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadConnection);
    assert_eq!(ours.status(), before);
    assert!(!connection.is_released());
    assert_eq!(theirs.status().in_use(), 1);

    theirs.release_connection(&mut connection).unwrap();
}

#[tokio::test]
async fn test_dropped_connection_returns_lease() {
    let connector = library();
    let manager = create_manager_with(config(1), &connector).await.unwrap();

    {
        let _connection = manager.get_connection().await.unwrap();
        assert_eq!(manager.status().in_use(), 1);
    }
    assert_eq!(manager.status().in_use(), 0);
}

#[tokio::test]
async fn test_destroyed_manager_hands_out_nothing() {
    let connector = library();
    let manager = create_manager_with(config(2), &connector).await.unwrap();
    let mut outstanding = manager.get_connection().await.unwrap();

    destroy_manager(&manager).await;
    assert!(manager.is_destroyed());
    assert!(!outstanding.is_usable());

    let err = manager.get_connection().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManagerDestroyed);

    // Returning a lease to a closed pool still marks it released.
    manager.release_connection(&mut outstanding).unwrap();
    assert!(outstanding.is_released());

    destroy_manager(&manager).await;
    assert_eq!(connector.close_count(), 2);
}

#[tokio::test]
async fn test_pool_failures_reach_callback() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let connector = library();
    let config =
        config(2).on_unexpected_failure(move |failure: &PoolFailure| sink.lock().push(failure.clone()));

    let manager = create_manager_with(config, &connector).await.unwrap();
    assert!(connector.emit_error(1, "connection reset by peer"));

    assert_eq!(
        seen.lock().as_slice(),
        &[PoolFailure::new(1, "connection reset by peer")]
    );
    // Nothing is re-thrown: the manager keeps working.
    assert!(manager.get_connection().await.is_ok());
}
