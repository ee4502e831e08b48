//! Compile a statement, run it and normalize the result.
//!
//! ```bash
//! export MSSQL_CONNECTION="Server=localhost,1433;Database=library;User Id=sa;Password=...;TrustServerCertificate=true"
//! cargo run -p mssql-adapter --example basic
//! ```

use mssql_adapter::{
    ConnectionConfig, Meta, QueryType, compile_statement, create_manager,
    parse_native_query_error, parse_native_query_result, send_native_query,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mssql_adapter=debug".into()),
        )
        .init();

    let connection_string = std::env::var("MSSQL_CONNECTION")?;
    let config = ConnectionConfig::from_connection_string(&connection_string)?
        .on_unexpected_failure(|failure| eprintln!("pool failure: {failure}"));

    let manager = create_manager(config).await?;
    println!(
        "catalog: {} tables, pools: {}",
        manager.catalog().table_count(),
        manager.status().pools.len()
    );

    let compiled = compile_statement(
        &json!({
            "select": ["*"],
            "from": "books",
            "where": {"year": {">": 1990}},
            "orderBy": [{"title": "asc"}],
            "limit": 10
        }),
        &Meta::default(),
    )?;
    println!("{}", compiled.native_query);

    let mut connection = manager.get_connection().await?;
    match send_native_query(&connection, Some(&manager), compiled.into()).await {
        Ok(report) => {
            let parsed = parse_native_query_result(QueryType::Select, &report.result, &report.meta);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Err(e) => {
            let report = parse_native_query_error(&e, &Meta::default());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    manager.release_connection(&mut connection)?;
    manager.destroy().await;
    Ok(())
}
