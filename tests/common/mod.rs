#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Result, anyhow};
use bayunkv::common::types::{Bins, RecordKey, UserKey};
use bayunkv::query::ast::{ExprArena, ExprId, ParsedStatement, Query, Select, SelectItem, TableFactor};
use bayunkv::storage::WriteMode;
use bayunkv::{Compiler, DataValue, EngineConfig, ExecutablePlan, IndexCatalog, KeyValueStore, MemoryStore, Row};

pub const NAMESPACE: &str = "test";

// Store people(PK, first_name, last_name, age) with keys 1..=5
pub fn people_store() -> Result<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::new());
    let people = [
        (1, "John", "Smith", 34),
        (2, "Jane", "Doe", 28),
        (3, "Bob", "Smith", 45),
        (4, "Alice", "Jones", 28),
        (5, "Eve", "Doe", 51),
    ];
    for (id, first, last, age) in people {
        put(
            store.as_ref(),
            "people",
            id,
            vec![
                ("first_name", DataValue::Text(first.to_string())),
                ("last_name", DataValue::Text(last.to_string())),
                ("age", DataValue::Integer(age)),
            ],
        )?;
    }
    Ok(store)
}

// Add orders(PK, person, item, qty) to a store; person 2 and 5 have no orders
pub fn add_orders(store: &MemoryStore) -> Result<()> {
    let orders = [(100, 1, "book", 2), (101, 1, "pen", 5), (102, 3, "cup", 1), (103, 4, "lamp", 1)];
    for (id, person, item, qty) in orders {
        put(
            store,
            "orders",
            id,
            vec![
                ("person", DataValue::Integer(person)),
                ("item", DataValue::Text(item.to_string())),
                ("qty", DataValue::Integer(qty)),
            ],
        )?;
    }
    Ok(())
}

pub fn put(store: &dyn KeyValueStore, set: &str, id: i64, bins: Vec<(&str, DataValue)>) -> Result<()> {
    let bins: Bins = bins.into_iter().map(|(name, value)| (name.to_string(), value)).collect();
    let created = store.put(&RecordKey::new(NAMESPACE, set, UserKey::Integer(id)), bins, WriteMode::CreateOnly)?;
    if !created {
        return Err(anyhow!("record {} already exists in {}", id, set));
    }
    Ok(())
}

// Compile a statement against the indexes currently registered in the store
pub fn compile(store: &dyn KeyValueStore, parsed: &ParsedStatement) -> Result<ExecutablePlan> {
    let indexes = IndexCatalog::from_store(store, NAMESPACE)?;
    Ok(Compiler::new(EngineConfig::with_namespace(NAMESPACE), indexes).compile(parsed)?)
}

// Compile, bind and collect the rows of a query
pub fn query_rows(store: &Arc<MemoryStore>, parsed: &ParsedStatement, params: &[DataValue]) -> Result<Vec<Row>> {
    let plan = compile(store.as_ref(), parsed)?;
    Ok(plan.bind(params)?.execute(store.clone())?.into_rows()?)
}

// Compile, bind and execute a write; returns the affected count
pub fn execute_write(store: &Arc<MemoryStore>, parsed: &ParsedStatement, params: &[DataValue]) -> Result<u64> {
    let plan = compile(store.as_ref(), parsed)?;
    plan.bind(params)?
        .execute(store.clone())?
        .affected()
        .ok_or_else(|| anyhow!("statement returned rows"))
}

// SELECT <columns> FROM <table>
pub fn select_columns(arena: &mut ExprArena, table: &str, columns: &[&str]) -> Select {
    let mut select = Select::new(TableFactor::table(table));
    select.projection = columns
        .iter()
        .map(|name| SelectItem::Expr {
            expr: arena.column(name),
            alias: None,
        })
        .collect();
    select
}

pub fn select_all(table: &str) -> Select {
    let mut select = Select::new(TableFactor::table(table));
    select.projection = vec![SelectItem::Wildcard];
    select
}

pub fn parsed_query(arena: ExprArena, select: Select) -> ParsedStatement {
    ParsedStatement::query(arena, Query::select(select))
}

pub fn expr_item(expr: ExprId, alias: Option<&str>) -> SelectItem {
    SelectItem::Expr {
        expr,
        alias: alias.map(str::to_string),
    }
}

// Values of one column across rows
pub fn column_values(rows: &[Row], name: &str) -> Vec<DataValue> {
    rows.iter().map(|row| row.get(name).cloned().unwrap_or(DataValue::Null)).collect()
}

pub fn ints(rows: &[Row], name: &str) -> Vec<i64> {
    rows.iter().filter_map(|row| row.get(name).and_then(DataValue::as_i64)).collect()
}

pub fn texts(rows: &[Row], name: &str) -> Vec<String> {
    rows.iter()
        .filter_map(|row| match row.get(name) {
            Some(DataValue::Text(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
