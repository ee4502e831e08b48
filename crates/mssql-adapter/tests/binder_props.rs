//! Property tests for binding and compilation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mssql_adapter::{
    BindError, ColumnMeta, Meta, SchemaCatalog, SqlValue, Statement, WireType, bind,
    compile_statement, rewrite_template_placeholders,
};
use proptest::prelude::*;
use serde_json::json;

const NAME_LENGTH: i64 = 20;

fn catalog() -> SchemaCatalog {
    SchemaCatalog::from_tables([(
        "people",
        vec![
            ColumnMeta::new("name", "varchar").with_length(NAME_LENGTH),
            ColumnMeta::new("nick", "nvarchar").with_length(NAME_LENGTH),
            ColumnMeta::new("age", "int"),
        ],
    )])
}

const SQL: &str = "select * from people where name = @p0 and nick = @p1 and age = @p2";

proptest! {
    #[test]
    fn bind_within_limits_types_every_column(
        name in "[a-z]{0,20}",
        nick in "[a-z]{0,20}",
        age in any::<i32>(),
    ) {
        let statement = Statement::new("people", ["name", "nick", "age"]);
        let values = vec![
            SqlValue::from(name.as_str()),
            SqlValue::from(nick.as_str()),
            SqlValue::from(age),
        ];

        let bound = bind(SQL, Some(&statement), &values, &catalog()).unwrap();

        prop_assert_eq!(bound.parameters.len(), 3);
        prop_assert!(matches!(bound.parameters[0].wire_type(), WireType::VarChar { .. }), "expected VarChar wire type");
        prop_assert!(matches!(bound.parameters[1].wire_type(), WireType::NVarChar { .. }), "expected NVarChar wire type");
        prop_assert_eq!(bound.parameters[2].wire_type(), WireType::Int);
        for (position, parameter) in bound.parameters.iter().enumerate() {
            prop_assert_eq!(parameter.position(), position);
            prop_assert_eq!(parameter.value(), &values[position]);
        }
    }

    #[test]
    fn bind_over_limit_binds_nothing(name in "[a-z]{21,60}") {
        let statement = Statement::new("people", ["name"]);
        let values = vec![SqlValue::from(name.as_str())];

        let err = bind(
            "select * from people where name = @p0",
            Some(&statement),
            &values,
            &catalog(),
        )
        .unwrap_err();

        let is_too_large = matches!(
            err,
            BindError::ValueTooLarge { limit, actual, .. }
                if limit == NAME_LENGTH as u64 && actual == name.len()
        );
        prop_assert!(is_too_large);
    }

    #[test]
    fn bind_unknown_column_always_fails(column in "[a-z]{3,12}") {
        prop_assume!(!["name", "nick", "age"].contains(&column.as_str()));
        let statement = Statement::new("people", [column.clone()]);
        let sql = format!("select * from people where {column} = @p0");

        let err = bind(&sql, Some(&statement), &[SqlValue::Int(1)], &catalog()).unwrap_err();
        prop_assert_eq!(
            err,
            BindError::UnknownColumn { table: "people".into(), column }
        );
    }

    #[test]
    fn compile_is_idempotent(year in any::<i32>(), limit in 1u32..1000, skip in 0u32..1000) {
        let statement = json!({
            "select": ["title", "year"],
            "from": "books",
            "where": {"year": {">=": year}},
            "limit": limit,
            "skip": skip,
        });
        let first = compile_statement(&statement, &Meta::default()).unwrap();
        let second = compile_statement(&statement, &Meta::default()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn template_placeholders_shift_by_one(count in 1usize..40) {
        let sql = (1..=count)
            .map(|n| format!("${n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let expected = (0..count)
            .map(|n| format!("@p{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        prop_assert_eq!(rewrite_template_placeholders(&sql, count), expected);
    }
}
