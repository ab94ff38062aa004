use anyhow::Result;
use bayunkv::common::types::{RecordKey, UserKey};
use bayunkv::query::ast::{BinaryOperator, Expr, ExprArena, OrderByItem, ParsedStatement, Query, Select, SelectItem, SetOperator, TableFactor};
use bayunkv::{DataValue, ExecutionResult, QueryError};

#[path = "../common/mod.rs"]
mod common;
use common::{
    NAMESPACE, add_orders, compile, expr_item, ints, parsed_query, people_store, put, query_rows, select_columns,
    texts,
};

#[test]
fn test_order_by_desc_with_limit_and_offset() -> Result<()> {
    let store = people_store()?;
    for id in [3, 1, 4, 2] {
        put(store.as_ref(), "t", id, vec![("id", DataValue::Integer(id))])?;
    }

    let mut arena = ExprArena::new();
    let select = select_columns(&mut arena, "t", &["id"]);
    let id = arena.column("id");
    let mut query = Query::select(select);
    query.order_by = vec![OrderByItem { expr: id, asc: false }];
    query.limit = Some(arena.int(2));
    query.offset = Some(arena.int(1));
    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;

    assert_eq!(ints(&rows, "id"), vec![3, 2]);
    Ok(())
}

#[test]
fn test_offset_past_end_returns_nothing() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let select = select_columns(&mut arena, "people", &["first_name"]);
    let mut query = Query::select(select);
    query.offset = Some(arena.int(10));
    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;
    assert!(rows.is_empty());
    Ok(())
}

#[test]
fn test_computed_columns_and_functions() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let first_name = arena.column("first_name");
    let name = arena.function("upper", vec![first_name]);
    let age = arena.column("age");
    let two = arena.int(2);
    let doubled = arena.binary(age, BinaryOperator::Multiply, two);
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![expr_item(name, Some("name")), expr_item(doubled, Some("double_age"))];
    let pk = arena.column("PK");
    let one = arena.int(1);
    select.selection = Some(arena.eq(pk, one));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), &["name".to_string(), "double_age".to_string()]);
    assert_eq!(rows[0].get("name"), Some(&DataValue::Text("JOHN".to_string())));
    assert_eq!(rows[0].get("double_age"), Some(&DataValue::Integer(68)));
    Ok(())
}

#[test]
fn test_row_filter_sees_computed_alias() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let age = arena.column("age");
    let one = arena.int(1);
    let next_age = arena.binary(age, BinaryOperator::Plus, one);
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![expr_item(next_age, Some("a"))];
    let alias = arena.column("a");
    let one = arena.int(1);
    let scaled = arena.binary(alias, BinaryOperator::Multiply, one);
    let forty = arena.int(40);
    select.selection = Some(arena.binary(scaled, BinaryOperator::Gt, forty));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(ints(&rows, "a"), vec![46, 52]);
    assert!(rows.iter().all(|row| row.columns() == ["a".to_string()]));
    Ok(())
}

#[test]
fn test_key_pseudo_columns() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["PK", "PK_DIGEST"]);
    let pk = arena.column("PK");
    let two = arena.int(2);
    select.selection = Some(arena.eq(pk, two));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    let digest = RecordKey::new(NAMESPACE, "people", UserKey::Integer(2)).digest();
    assert_eq!(rows[0].get("PK"), Some(&DataValue::Integer(2)));
    assert_eq!(rows[0].get("PK_DIGEST"), Some(&DataValue::Blob(digest)));
    Ok(())
}

#[test]
fn test_missing_bin_reads_as_null() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name", "nickname"]);
    let pk = arena.column("PK");
    let one = arena.int(1);
    select.selection = Some(arena.eq(pk, one));
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(rows[0].get("nickname"), Some(&DataValue::Null));
    Ok(())
}

#[test]
fn test_in_sub_query_becomes_batch_lookup() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;

    let mut arena = ExprArena::new();
    let inner = select_columns(&mut arena, "orders", &["person"]);
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    select.selection = Some(arena.in_subquery(pk, Query::select(inner)));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(texts(&rows, "first_name"), vec!["John", "Bob", "Alice"]);
    assert_eq!(store.stats().batch_gets, 1);
    Ok(())
}

#[test]
fn test_scalar_sub_query_comparison() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let mut inner = select_columns(&mut arena, "people", &["age"]);
    let pk = arena.column("PK");
    let two = arena.int(2);
    inner.selection = Some(arena.eq(pk, two));
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let sub = arena.alloc(Expr::Subquery(Box::new(Query::select(inner))));
    select.selection = Some(arena.eq(age, sub));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(texts(&rows, "first_name"), vec!["Jane", "Alice"]);
    Ok(())
}

#[test]
fn test_scalar_sub_query_with_many_rows_fails() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let inner = select_columns(&mut arena, "people", &["age"]);
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let sub = arena.alloc(Expr::Subquery(Box::new(Query::select(inner))));
    select.selection = Some(arena.eq(age, sub));

    let err = query_rows(&store, &parsed_query(arena, select), &[]).unwrap_err();
    match err.downcast_ref::<QueryError>() {
        Some(e @ QueryError::TooManyRows(_)) => assert_eq!(e.to_string(), "Operator = requires 1 parameter"),
        other => panic!("expected TooManyRows, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_sub_query_with_two_columns_fails() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let inner = select_columns(&mut arena, "people", &["age", "first_name"]);
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    select.selection = Some(arena.in_subquery(pk, Query::select(inner)));

    let err = query_rows(&store, &parsed_query(arena, select), &[]).unwrap_err();
    assert!(matches!(err.downcast_ref::<QueryError>(), Some(QueryError::WrongColumnCount(2))));
    Ok(())
}

#[test]
fn test_derived_table_source() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let mut inner = select_columns(&mut arena, "people", &["first_name", "age"]);
    let age = arena.column("age");
    let thirty = arena.int(30);
    inner.selection = Some(arena.binary(age, BinaryOperator::Gt, thirty));

    let mut select = Select::new(TableFactor::Derived {
        subquery: Box::new(Query::select(inner)),
        alias: Some("s".to_string()),
    });
    let first_name = arena.column("first_name");
    select.projection = vec![expr_item(first_name, None)];
    let age = arena.column("age");
    let fifty = arena.int(50);
    select.selection = Some(arena.binary(age, BinaryOperator::Lt, fifty));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(texts(&rows, "first_name"), vec!["John", "Bob"]);
    Ok(())
}

#[test]
fn test_derived_table_must_provide_columns() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let inner = select_columns(&mut arena, "people", &["first_name"]);
    let mut select = Select::new(TableFactor::Derived {
        subquery: Box::new(Query::select(inner)),
        alias: None,
    });
    let age = arena.column("age");
    select.projection = vec![expr_item(age, None)];

    let err = query_rows(&store, &parsed_query(arena, select), &[]).unwrap_err();
    assert!(matches!(err.downcast_ref::<QueryError>(), Some(QueryError::ProjectionMismatch(_))));
    Ok(())
}

fn last_names(op: SetOperator) -> (ExprArena, Query) {
    let mut arena = ExprArena::new();
    let left = select_columns(&mut arena, "people", &["last_name"]);
    let right = select_columns(&mut arena, "people", &["last_name"]);
    let query = Query::set_operation(Query::select(left), op, Query::select(right));
    (arena, query)
}

#[test]
fn test_union_removes_duplicates_in_first_seen_order() -> Result<()> {
    let store = people_store()?;
    let (arena, query) = last_names(SetOperator::Union);
    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;
    assert_eq!(texts(&rows, "last_name"), vec!["Smith", "Doe", "Jones"]);
    Ok(())
}

#[test]
fn test_union_all_keeps_every_row() -> Result<()> {
    let store = people_store()?;
    let (arena, query) = last_names(SetOperator::UnionAll);
    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;
    let names = texts(&rows, "last_name");
    assert_eq!(names.len(), 10);
    assert_eq!(&names[..5], &names[5..]);
    Ok(())
}

#[test]
fn test_union_with_order_and_limit() -> Result<()> {
    let store = people_store()?;
    let (mut arena, mut query) = last_names(SetOperator::Union);
    let position = arena.int(1);
    query.order_by = vec![OrderByItem { expr: position, asc: true }];
    query.limit = Some(arena.int(2));
    let rows = query_rows(&store, &ParsedStatement::query(arena, query), &[])?;
    assert_eq!(texts(&rows, "last_name"), vec!["Doe", "Jones"]);
    Ok(())
}

#[test]
fn test_select_distinct_single_column() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["last_name"]);
    select.distinct = true;
    let mut rows = texts(&query_rows(&store, &parsed_query(arena, select), &[])?, "last_name");
    rows.sort();
    assert_eq!(rows, vec!["Doe", "Jones", "Smith"]);
    Ok(())
}

#[test]
fn test_row_stream_is_pulled_lazily() -> Result<()> {
    let store = people_store()?;
    let mut select = Select::new(TableFactor::table("people"));
    select.projection = vec![SelectItem::Wildcard];
    let plan = compile(store.as_ref(), &parsed_query(ExprArena::new(), select))?;

    let ExecutionResult::Rows(mut stream) = plan.execute(store.clone())? else {
        panic!("expected rows");
    };
    let first = stream.next().transpose()?.expect("first row");
    assert_eq!(first.get("first_name"), Some(&DataValue::Text("John".to_string())));
    assert_eq!(first.columns(), &["first_name".to_string(), "last_name".to_string(), "age".to_string()]);
    assert_eq!(stream.count(), 4);
    Ok(())
}
