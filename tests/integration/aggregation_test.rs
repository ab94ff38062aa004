use anyhow::Result;
use bayunkv::query::ast::{BinaryOperator, ExprArena, OrderByItem, ParsedStatement, Query, Select, TableFactor};
use bayunkv::query::planner::AccessStrategy;
use bayunkv::{DataValue, QueryError};

#[path = "../common/mod.rs"]
mod common;
use common::{compile, expr_item, ints, parsed_query, people_store, query_rows, texts};

#[test]
fn test_count_sum_max_without_grouping() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let count = arena.count_star();
    let age = arena.column("age");
    let oldest = arena.function("max", vec![age]);
    let age = arena.column("age");
    let total = arena.function("sum", vec![age]);
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![
        expr_item(count, Some("n")),
        expr_item(oldest, Some("oldest")),
        expr_item(total, Some("total")),
    ];
    let parsed = parsed_query(arena, select);

    let plan = compile(store.as_ref(), &parsed)?;
    assert!(matches!(
        plan.query_plan().and_then(|p| p.strategy()),
        Some(AccessStrategy::Aggregation { .. })
    ));

    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), &["n".to_string(), "oldest".to_string(), "total".to_string()]);
    assert_eq!(rows[0].get("n"), Some(&DataValue::Integer(5)));
    assert_eq!(rows[0].get("oldest"), Some(&DataValue::Integer(51)));
    assert_eq!(rows[0].get("total"), Some(&DataValue::Integer(186)));
    assert_eq!(store.stats().aggregations, 1);
    assert_eq!(store.stats().scans, 0);
    Ok(())
}

#[test]
fn test_count_of_empty_selection() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let count = arena.count_star();
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![expr_item(count, Some("n"))];
    let last_name = arena.column("last_name");
    let nobody = arena.string("Nobody");
    select.selection = Some(arena.eq(last_name, nobody));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(ints(&rows, "n"), vec![0]);
    Ok(())
}

fn count_by_last_name(arena: &mut ExprArena) -> Select {
    let last_name = arena.column("last_name");
    let count = arena.count_star();
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![expr_item(last_name, None), expr_item(count, Some("n"))];
    select.group_by = vec![arena.column("last_name")];
    select
}

#[test]
fn test_group_by_with_order() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let select = count_by_last_name(&mut arena);
    let last_name = arena.column("last_name");
    let mut query = Query::select(select);
    query.order_by = vec![OrderByItem { expr: last_name, asc: true }];

    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;
    assert_eq!(texts(&rows, "last_name"), vec!["Doe", "Jones", "Smith"]);
    assert_eq!(ints(&rows, "n"), vec![2, 1, 2]);
    Ok(())
}

#[test]
fn test_having_filters_groups() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = count_by_last_name(&mut arena);
    let count = arena.count_star();
    let one = arena.int(1);
    select.having = Some(arena.binary(count, BinaryOperator::Gt, one));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    let mut names = texts(&rows, "last_name");
    names.sort();
    assert_eq!(names, vec!["Doe", "Smith"]);
    Ok(())
}

#[test]
fn test_group_column_must_be_grouped() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = count_by_last_name(&mut arena);
    let first_name = arena.column("first_name");
    select.projection.push(expr_item(first_name, None));

    let err = compile(store.as_ref(), &parsed_query(arena, select)).unwrap_err();
    assert!(err.downcast_ref::<QueryError>().is_some());
    Ok(())
}

#[test]
fn test_aggregation_over_derived_table_runs_on_client() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut inner = common::select_columns(&mut arena, "people", &["age"]);
    let age = arena.column("age");
    let thirty = arena.int(30);
    inner.selection = Some(arena.binary(age, BinaryOperator::Gt, thirty));

    let mut select = Select::new(TableFactor::Derived {
        subquery: Box::new(Query::select(inner)),
        alias: Some("s".to_string()),
    });
    let count = arena.count_star();
    let age = arena.column("age");
    let youngest = arena.function("min", vec![age]);
    select.projection = vec![expr_item(count, Some("n")), expr_item(youngest, Some("youngest"))];

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(ints(&rows, "n"), vec![3]);
    assert_eq!(ints(&rows, "youngest"), vec![34]);
    assert_eq!(store.stats().aggregations, 0);
    Ok(())
}

#[test]
fn test_aggregation_with_row_filter_is_rejected() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let count = arena.count_star();
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![expr_item(count, Some("n"))];
    let age = arena.column("age");
    let one = arena.int(1);
    let sum = arena.binary(age, BinaryOperator::Plus, one);
    let forty = arena.int(40);
    select.selection = Some(arena.binary(sum, BinaryOperator::Gt, forty));

    let err = compile(store.as_ref(), &parsed_query(arena, select)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueryError>(),
        Some(QueryError::UnsupportedConstruct(_))
    ));
    Ok(())
}
