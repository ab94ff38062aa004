use anyhow::Result;
use bayunkv::query::ast::{BinaryOperator, ExprArena, Join, JoinKind, Select, SelectItem, TableFactor};
use bayunkv::DataValue;

#[path = "../common/mod.rs"]
mod common;
use common::{add_orders, column_values, compile, expr_item, parsed_query, people_store, query_rows, texts};

// SELECT people.first_name, o.item FROM people <kind> JOIN orders o ON o.person = people.PK
fn people_with_orders(arena: &mut ExprArena, kind: JoinKind) -> Select {
    let mut select = Select::new(TableFactor::table("people"));
    let first_name = arena.qualified("people", "first_name");
    let item = arena.qualified("o", "item");
    select.projection = vec![expr_item(first_name, None), expr_item(item, None)];
    let person = arena.qualified("o", "person");
    let pk = arena.qualified("people", "PK");
    select.joins.push(Join {
        relation: TableFactor::aliased("orders", "o"),
        kind,
        constraint: Some(arena.eq(person, pk)),
    });
    select
}

#[test]
fn test_inner_join_drops_unmatched_rows() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let select = people_with_orders(&mut arena, JoinKind::Inner);
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(texts(&rows, "first_name"), vec!["John", "John", "Bob", "Alice"]);
    assert_eq!(texts(&rows, "item"), vec!["book", "pen", "cup", "lamp"]);
    assert!(rows.iter().all(|row| row.columns() == ["first_name".to_string(), "item".to_string()]));
    Ok(())
}

#[test]
fn test_left_join_pads_unmatched_rows() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let select = people_with_orders(&mut arena, JoinKind::Left);
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(texts(&rows, "first_name"), vec!["John", "John", "Jane", "Bob", "Alice", "Eve"]);
    let items = column_values(&rows, "item");
    assert_eq!(items[2], DataValue::Null);
    assert_eq!(items[5], DataValue::Null);
    assert_eq!(items.iter().filter(|v| v.is_null()).count(), 2);
    Ok(())
}

#[test]
fn test_join_on_inner_primary_key_uses_point_lookups() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;

    // SELECT o.item, p.first_name FROM orders o JOIN people p ON p.PK = o.person
    let mut arena = ExprArena::new();
    let mut select = Select::new(TableFactor::aliased("orders", "o"));
    let item = arena.qualified("o", "item");
    let first_name = arena.qualified("p", "first_name");
    select.projection = vec![expr_item(item, None), expr_item(first_name, None)];
    let pk = arena.qualified("p", "PK");
    let person = arena.qualified("o", "person");
    select.joins.push(Join {
        relation: TableFactor::aliased("people", "p"),
        kind: JoinKind::Inner,
        constraint: Some(arena.eq(pk, person)),
    });
    let parsed = parsed_query(arena, select);

    store.reset_stats();
    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(texts(&rows, "first_name"), vec!["John", "John", "Bob", "Alice"]);
    let stats = store.stats();
    assert_eq!(stats.gets, 4);
    assert_eq!(stats.scans, 1);
    Ok(())
}

#[test]
fn test_where_on_joined_table_filters_inner_rows() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let mut select = people_with_orders(&mut arena, JoinKind::Inner);
    let qty = arena.qualified("o", "qty");
    let one = arena.int(1);
    select.selection = Some(arena.binary(qty, BinaryOperator::Gt, one));
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(texts(&rows, "item"), vec!["book", "pen"]);
    Ok(())
}

#[test]
fn test_expression_over_joined_columns() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let mut select = people_with_orders(&mut arena, JoinKind::Inner);
    let qty = arena.qualified("o", "qty");
    let age = arena.qualified("people", "age");
    let total = arena.binary(qty, BinaryOperator::Plus, age);
    select.projection.push(expr_item(total, Some("total")));
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(common::ints(&rows, "total"), vec![36, 39, 46, 29]);
    Ok(())
}

#[test]
fn test_wildcard_join_keeps_both_sides() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let mut select = people_with_orders(&mut arena, JoinKind::Inner);
    select.projection = vec![SelectItem::Wildcard];
    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].get("first_name"), Some(&DataValue::Text("John".to_string())));
    assert_eq!(rows[0].get("item"), Some(&DataValue::Text("book".to_string())));
    assert!(!rows[0].contains("PK"));
    Ok(())
}

#[test]
fn test_where_on_joined_primary_key_narrows_lookups() -> Result<()> {
    let store = people_store()?;
    add_orders(&store)?;
    let mut arena = ExprArena::new();
    let mut select = Select::new(TableFactor::aliased("orders", "o"));
    let item = arena.qualified("o", "item");
    select.projection = vec![expr_item(item, None)];
    let pk = arena.qualified("p", "PK");
    let person = arena.qualified("o", "person");
    select.joins.push(Join {
        relation: TableFactor::aliased("people", "p"),
        kind: JoinKind::Inner,
        constraint: Some(arena.eq(pk, person)),
    });
    let pk = arena.qualified("p", "PK");
    let one = arena.int(1);
    select.selection = Some(arena.eq(pk, one));
    let parsed = parsed_query(arena, select);

    store.reset_stats();
    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(texts(&rows, "item"), vec!["book", "pen"]);
    // people 3 and 4 intersect to an empty key set
    assert_eq!(store.stats().gets, 2);
    Ok(())
}
