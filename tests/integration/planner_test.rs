use anyhow::Result;
use bayunkv::common::types::UserKey;
use bayunkv::query::ast::{BinaryOperator, ExprArena, IndexType, ParsedStatement, Statement};
use bayunkv::query::ast::{CreateIndex, ObjectName};
use bayunkv::query::planner::AccessStrategy;
use bayunkv::storage::IndexFilter;
use bayunkv::{DataValue, QueryError};

#[path = "../common/mod.rs"]
mod common;
use common::{compile, execute_write, parsed_query, people_store, query_rows, select_all, select_columns};

#[test]
fn test_primary_key_equality_is_point_lookup() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    let one = arena.int(1);
    select.selection = Some(arena.eq(pk, one));
    let parsed = parsed_query(arena, select);

    let plan = compile(store.as_ref(), &parsed)?;
    let query_plan = plan.query_plan().expect("query plan");
    assert!(matches!(
        query_plan.strategy(),
        Some(AccessStrategy::PointLookup { key: UserKey::Integer(1), .. })
    ));
    assert_eq!(query_plan.labels(), vec!["first_name"]);

    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("first_name"), Some(&DataValue::Text("John".to_string())));
    assert_eq!(store.stats().gets, 1);
    assert_eq!(store.stats().scans, 0);
    Ok(())
}

#[test]
fn test_primary_key_in_list_is_batch_lookup() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_all("people");
    let pk = arena.column("PK");
    let keys = vec![arena.int(1), arena.int(2), arena.int(3), arena.int(2)];
    select.selection = Some(arena.in_list(pk, keys));
    let parsed = parsed_query(arena, select);

    let plan = compile(store.as_ref(), &parsed)?;
    match plan.query_plan().and_then(|p| p.strategy()) {
        Some(AccessStrategy::BatchLookup { keys, .. }) => {
            assert_eq!(keys, &vec![UserKey::Integer(1), UserKey::Integer(2), UserKey::Integer(3)]);
        }
        other => panic!("expected a batch lookup, got {:?}", other),
    }

    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| !row.contains("PK")));
    assert_eq!(store.stats().batch_gets, 1);
    assert_eq!(store.stats().scans, 0);
    Ok(())
}

#[test]
fn test_indexed_equality_uses_index_scan() -> Result<()> {
    let store = people_store()?;
    let create = ParsedStatement::new(
        ExprArena::new(),
        Statement::CreateIndex(CreateIndex {
            name: "people_age".to_string(),
            table: ObjectName::new("people"),
            column: "age".to_string(),
            index_type: IndexType::Numeric,
        }),
    );
    execute_write(&store, &create, &[])?;

    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let value = arena.int(28);
    select.selection = Some(arena.eq(age, value));
    let parsed = parsed_query(arena, select);

    let plan = compile(store.as_ref(), &parsed)?;
    match plan.query_plan().and_then(|p| p.strategy()) {
        Some(AccessStrategy::IndexFilteredScan { filter, residual }) => {
            assert_eq!(
                filter,
                &IndexFilter::Equal {
                    bin: "age".to_string(),
                    value: DataValue::Integer(28)
                }
            );
            assert!(residual.is_empty());
        }
        other => panic!("expected an index scan, got {:?}", other),
    }
    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(common::texts(&rows, "first_name"), vec!["Jane", "Alice"]);
    Ok(())
}

#[test]
fn test_non_native_where_falls_back_to_row_filter() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let one = arena.int(1);
    let sum = arena.binary(age, BinaryOperator::Plus, one);
    let limit = arena.int(40);
    select.selection = Some(arena.binary(sum, BinaryOperator::Gt, limit));
    let parsed = parsed_query(arena, select);

    let plan = compile(store.as_ref(), &parsed)?;
    let query_plan = plan.query_plan().expect("query plan");
    assert_eq!(query_plan.strategy().map(|s| s.name()), Some("FullScan"));
    assert_eq!(
        query_plan.fallback.as_ref().map(|f| f.text.as_str()),
        Some("age + 1 > 40")
    );

    let rows = query_rows(&store, &parsed, &[])?;
    assert_eq!(common::texts(&rows, "first_name"), vec!["Bob", "Eve"]);
    Ok(())
}

#[test]
fn test_between_matches_explicit_range() -> Result<()> {
    let store = people_store()?;

    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let (low, high) = (arena.int(28), arena.int(34));
    select.selection = Some(arena.between(age, low, high));
    let between = query_rows(&store, &parsed_query(arena, select), &[])?;

    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let age = arena.column("age");
    let low = arena.int(28);
    let lower = arena.binary(age, BinaryOperator::GtEq, low);
    let age = arena.column("age");
    let high = arena.int(34);
    let upper = arena.binary(age, BinaryOperator::LtEq, high);
    select.selection = Some(arena.and(lower, upper));
    let explicit = query_rows(&store, &parsed_query(arena, select), &[])?;

    assert_eq!(between, explicit);
    assert_eq!(common::texts(&between, "first_name"), vec!["John", "Jane", "Alice"]);
    Ok(())
}

#[test]
fn test_unsupported_join_condition() -> Result<()> {
    use bayunkv::query::ast::{Join, JoinKind, TableFactor};

    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let person = arena.qualified("o", "person");
    let pk = arena.qualified("people", "PK");
    let constraint = arena.binary(person, BinaryOperator::Gt, pk);
    select.joins.push(Join {
        relation: TableFactor::aliased("orders", "o"),
        kind: JoinKind::Inner,
        constraint: Some(constraint),
    });
    let err = compile(store.as_ref(), &parsed_query(arena, select)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueryError>(),
        Some(QueryError::UnsupportedJoinCondition(_))
    ));
    Ok(())
}

#[test]
fn test_repeated_primary_key_condition_reads_one_record() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_all("people");
    let pk = arena.column("PK");
    let one = arena.int(1);
    let first = arena.eq(pk, one);
    let pk = arena.column("PK");
    let one = arena.int(1);
    let again = arena.eq(pk, one);
    select.selection = Some(arena.and(first, again));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("first_name"), Some(&DataValue::Text("John".to_string())));
    assert_eq!(store.stats().scans, 0);
    Ok(())
}

#[test]
fn test_key_list_with_key_inequality() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    let keys = vec![arena.int(1), arena.int(2), arena.int(3)];
    let listed = arena.in_list(pk, keys);
    let pk = arena.column("PK");
    let two = arena.int(2);
    let not_two = arena.binary(pk, BinaryOperator::NotEq, two);
    select.selection = Some(arena.and(listed, not_two));

    let rows = query_rows(&store, &parsed_query(arena, select), &[])?;
    let names: Vec<_> = rows.iter().filter_map(|r| r.get("first_name").cloned()).collect();
    assert_eq!(names, vec![DataValue::Text("John".to_string()), DataValue::Text("Bob".to_string())]);
    Ok(())
}

#[test]
fn test_bound_key_conditions_are_intersected() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let mut select = select_columns(&mut arena, "people", &["first_name"]);
    let pk = arena.column("PK");
    let param = arena.placeholder(1);
    let bound = arena.eq(pk, param);
    let pk = arena.column("PK");
    let three = arena.int(3);
    let literal = arena.eq(pk, three);
    select.selection = Some(arena.and(bound, literal));
    let plan = compile(store.as_ref(), &parsed_query(arena, select))?;

    let matching = plan.bind(&[DataValue::Integer(3)])?;
    assert!(matches!(
        matching.query_plan().and_then(|p| p.strategy()),
        Some(AccessStrategy::PointLookup { key: UserKey::Integer(3), .. })
    ));
    let rows = matching.execute(store.clone())?.into_rows()?;
    assert_eq!(rows.len(), 1);

    let other = plan.bind(&[DataValue::Integer(4)])?.execute(store.clone())?.into_rows()?;
    assert!(other.is_empty());
    Ok(())
}
