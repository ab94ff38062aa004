use anyhow::Result;
use bayunkv::common::types::UserKey;
use bayunkv::query::ast::{BinaryOperator, Delete, ExprArena, ObjectName, ParsedStatement, Query, Statement};
use bayunkv::query::planner::AccessStrategy;
use bayunkv::{DataValue, QueryError};

#[path = "../common/mod.rs"]
mod common;
use common::{compile, parsed_query, people_store, select_columns, texts};

#[test]
fn test_prepared_delete_by_key_skips_scan() -> Result<()> {
    let store = people_store()?;
    common::put(store.as_ref(), "people", 7, vec![("first_name", DataValue::Text("Zed".to_string()))])?;

    let mut arena = ExprArena::new();
    let pk = arena.column("PK");
    let param = arena.placeholder(1);
    let selection = arena.eq(pk, param);
    let parsed = ParsedStatement::new(
        arena,
        Statement::Delete(Delete {
            table: ObjectName::new("people"),
            selection: Some(selection),
            limit: None,
        }),
    );

    let plan = compile(store.as_ref(), &parsed)?;
    assert_eq!(plan.parameter_count(), 1);
    assert_eq!(plan.query_plan().and_then(|p| p.strategy()).map(|s| s.name()), Some("FullScan"));

    let bound = plan.bind(&[DataValue::Integer(7)])?;
    assert!(matches!(
        bound.query_plan().and_then(|p| p.strategy()),
        Some(AccessStrategy::PointLookup { key: UserKey::Integer(7), .. })
    ));
    store.reset_stats();
    let deleted = bound.execute(store.clone())?.affected();

    assert_eq!(deleted, Some(1));
    assert_eq!(store.stats().scans, 0);
    assert_eq!(store.len("test", "people"), 5);
    // the compiled plan is untouched by binding
    assert_eq!(plan.query_plan().and_then(|p| p.strategy()).map(|s| s.name()), Some("FullScan"));
    Ok(())
}

#[test]
fn test_rebinding_a_query() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let param = arena.placeholder(1);
    select.selection = Some(arena.eq(age, param));
    let plan = compile(store.as_ref(), &parsed_query(arena, select))?;

    let young = plan.bind(&[DataValue::Integer(28)])?.execute(store.clone())?.into_rows()?;
    let old = plan.bind(&[DataValue::Integer(51)])?.execute(store.clone())?.into_rows()?;
    let nobody = plan.bind(&[DataValue::Null])?.execute(store.clone())?.into_rows()?;

    assert_eq!(texts(&young, "first_name"), vec!["Jane", "Alice"]);
    assert_eq!(texts(&old, "first_name"), vec!["Eve"]);
    assert!(nobody.is_empty());
    Ok(())
}

#[test]
fn test_text_parameter_retypes_comparison() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let last_name = arena.column("last_name");
    let param = arena.placeholder(1);
    select.selection = Some(arena.eq(last_name, param));
    let plan = compile(store.as_ref(), &parsed_query(arena, select))?;

    let rows = plan
        .bind(&[DataValue::Text("Doe".to_string())])?
        .execute(store.clone())?
        .into_rows()?;
    assert_eq!(texts(&rows, "first_name"), vec!["Jane", "Eve"]);
    Ok(())
}

#[test]
fn test_float_parameter_switches_to_row_filter() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let param = arena.placeholder(1);
    select.selection = Some(arena.binary(age, BinaryOperator::Gt, param));
    let plan = compile(store.as_ref(), &parsed_query(arena, select))?;

    let bound = plan.bind(&[DataValue::Float(44.5)])?;
    assert!(bound.query_plan().is_some_and(|p| p.fallback.is_some()));
    let rows = bound.execute(store.clone())?.into_rows()?;
    assert_eq!(texts(&rows, "first_name"), vec!["Bob", "Eve"]);
    Ok(())
}

#[test]
fn test_parameters_in_key_list_and_limit() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    let keys = vec![arena.placeholder(1), arena.placeholder(2)];
    select.selection = Some(arena.in_list(pk, keys));
    let mut query = Query::select(select);
    query.limit = Some(arena.placeholder(3));
    let plan = compile(store.as_ref(), &ParsedStatement::query(arena, query))?;
    assert_eq!(plan.parameter_count(), 3);

    let bound = plan.bind(&[DataValue::Integer(4), DataValue::Integer(2), DataValue::Integer(1)])?;
    assert!(matches!(
        bound.query_plan().and_then(|p| p.strategy()),
        Some(AccessStrategy::BatchLookup { .. })
    ));
    let rows = bound.execute(store.clone())?.into_rows()?;
    assert_eq!(texts(&rows, "first_name"), vec!["Alice"]);
    Ok(())
}

#[test]
fn test_missing_parameter_is_reported() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let low = arena.placeholder(1);
    let high = arena.placeholder(2);
    select.selection = Some(arena.between(age, low, high));
    let plan = compile(store.as_ref(), &parsed_query(arena, select))?;

    let err = plan.bind(&[DataValue::Integer(1)]).unwrap_err();
    assert!(matches!(err, QueryError::ParameterNotFound(2)));
    Ok(())
}
