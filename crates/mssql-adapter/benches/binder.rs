//! Binder and compiler throughput.

#![allow(clippy::unwrap_used, missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use mssql_adapter::{
    ColumnMeta, Meta, SchemaCatalog, SqlValue, Statement, bind, compile_statement,
};
use serde_json::json;
use std::hint::black_box;

fn catalog() -> SchemaCatalog {
    SchemaCatalog::from_tables([(
        "books",
        vec![
            ColumnMeta::new("id", "int"),
            ColumnMeta::new("title", "nvarchar").with_length(255),
            ColumnMeta::new("author", "varchar").with_length(100),
            ColumnMeta::new("year", "int"),
            ColumnMeta::new("price", "decimal").with_precision(10, 2),
        ],
    )])
}

fn bench_bind(c: &mut Criterion) {
    let catalog = catalog();
    let sql = "select top (@p0) * from [books] where [title] like @p1 and [author] = @p2 \
               and [year] > @p3 and [price] < @p4";
    let statement = Statement::new("books", ["title", "author", "year", "price"]);
    let values = vec![
        SqlValue::Int(10),
        SqlValue::from("%dune%"),
        SqlValue::from("Frank Herbert"),
        SqlValue::Int(1960),
        SqlValue::Float(19.99),
    ];

    c.bench_function("bind_five_columns", |b| {
        b.iter(|| {
            bind(
                black_box(sql),
                Some(black_box(&statement)),
                black_box(&values),
                &catalog,
            )
            .unwrap()
        });
    });

    c.bench_function("bind_ad_hoc", |b| {
        b.iter(|| bind(black_box(sql), None, black_box(&values), &catalog).unwrap());
    });
}

fn bench_compile(c: &mut Criterion) {
    let statement = json!({
        "select": ["title", "author", "year"],
        "from": "books",
        "where": {"or": [{"title": {"like": "%dune%"}}, {"year": {">": 1990}}]},
        "orderBy": [{"year": "desc"}],
        "limit": 20,
        "skip": 40
    });
    let meta = Meta {
        collate: Some("Latin1_General_CI_AI".into()),
        ..Meta::default()
    };

    c.bench_function("compile_select", |b| {
        b.iter(|| compile_statement(black_box(&statement), black_box(&meta)).unwrap());
    });
}

criterion_group!(benches, bench_bind, bench_compile);
criterion_main!(benches);
