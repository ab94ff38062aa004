use anyhow::Result;
use bayunkv::common::types::{RecordKey, UserKey};
use bayunkv::query::ast::{
    BinaryOperator, CreateIndex, Delete, ExprArena, IndexType, Insert, ObjectName, ParsedStatement, Statement, Update,
};
use bayunkv::{DataValue, KeyValueStore, QueryError};

#[path = "../common/mod.rs"]
mod common;
use common::{NAMESPACE, execute_write, people_store};

fn insert_people(arena: &mut ExprArena, ignore: bool, rows: &[(i64, &str)]) -> Statement {
    let rows = rows
        .iter()
        .map(|(id, name)| vec![arena.int(*id), arena.string(name)])
        .collect();
    Statement::Insert(Insert {
        table: ObjectName::new("people"),
        columns: vec!["PK".to_string(), "first_name".to_string()],
        rows,
        ignore,
    })
}

fn bin(store: &dyn KeyValueStore, id: i64, name: &str) -> Result<Option<DataValue>> {
    let record = store.get(&RecordKey::new(NAMESPACE, "people", UserKey::Integer(id)))?;
    Ok(record.and_then(|r| r.bin(name).cloned()))
}

#[test]
fn test_insert_multiple_rows() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let statement = insert_people(&mut arena, false, &[(10, "Ann"), (11, "Ben")]);
    let written = execute_write(&store, &ParsedStatement::new(arena, statement), &[])?;

    assert_eq!(written, 2);
    assert_eq!(store.len(NAMESPACE, "people"), 7);
    assert_eq!(bin(store.as_ref(), 11, "first_name")?, Some(DataValue::Text("Ben".to_string())));
    Ok(())
}

#[test]
fn test_insert_duplicate_key() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let statement = insert_people(&mut arena, false, &[(1, "Again")]);
    let err = execute_write(&store, &ParsedStatement::new(arena, statement), &[]).unwrap_err();
    assert!(matches!(err.downcast_ref::<QueryError>(), Some(QueryError::DuplicateKey(_))));
    assert_eq!(bin(store.as_ref(), 1, "first_name")?, Some(DataValue::Text("John".to_string())));
    Ok(())
}

#[test]
fn test_insert_ignore_skips_existing_keys() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let statement = insert_people(&mut arena, true, &[(1, "Again"), (12, "Cid")]);
    let written = execute_write(&store, &ParsedStatement::new(arena, statement), &[])?;
    assert_eq!(written, 1);
    assert_eq!(store.len(NAMESPACE, "people"), 6);
    Ok(())
}

#[test]
fn test_insert_with_parameters() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let row = vec![arena.placeholder(1), arena.placeholder(2), arena.null()];
    let statement = Statement::Insert(Insert {
        table: ObjectName::new("people"),
        columns: vec!["PK".to_string(), "first_name".to_string(), "age".to_string()],
        rows: vec![row],
        ignore: false,
    });
    let params = [DataValue::Text("k1".to_string()), DataValue::Text("Kim".to_string())];
    execute_write(&store, &ParsedStatement::new(arena, statement), &params)?;

    let record = store
        .get(&RecordKey::new(NAMESPACE, "people", UserKey::Text("k1".to_string())))?
        .expect("inserted record");
    assert_eq!(record.bin("first_name"), Some(&DataValue::Text("Kim".to_string())));
    assert_eq!(record.bin("age"), None);
    Ok(())
}

#[test]
fn test_update_with_expression_and_null() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let age = arena.column("age");
    let one = arena.int(1);
    let older = arena.binary(age, BinaryOperator::Plus, one);
    let null = arena.null();
    let last_name = arena.column("last_name");
    let smith = arena.string("Smith");
    let statement = Statement::Update(Update {
        table: ObjectName::new("people"),
        assignments: vec![("age".to_string(), older), ("last_name".to_string(), null)],
        selection: Some(arena.eq(last_name, smith)),
        limit: None,
    });
    let updated = execute_write(&store, &ParsedStatement::new(arena, statement), &[])?;

    assert_eq!(updated, 2);
    assert_eq!(bin(store.as_ref(), 1, "age")?, Some(DataValue::Integer(35)));
    assert_eq!(bin(store.as_ref(), 3, "age")?, Some(DataValue::Integer(46)));
    assert_eq!(bin(store.as_ref(), 3, "last_name")?, None);
    assert_eq!(bin(store.as_ref(), 2, "age")?, Some(DataValue::Integer(28)));
    Ok(())
}

#[test]
fn test_update_by_key_with_parameter() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let name = arena.placeholder(1);
    let pk = arena.column("PK");
    let key = arena.placeholder(2);
    let statement = Statement::Update(Update {
        table: ObjectName::new("people"),
        assignments: vec![("first_name".to_string(), name)],
        selection: Some(arena.eq(pk, key)),
        limit: None,
    });
    store.reset_stats();
    let params = [DataValue::Text("Johnny".to_string()), DataValue::Integer(1)];
    let updated = execute_write(&store, &ParsedStatement::new(arena, statement), &params)?;

    assert_eq!(updated, 1);
    assert_eq!(store.stats().scans, 0);
    assert_eq!(bin(store.as_ref(), 1, "first_name")?, Some(DataValue::Text("Johnny".to_string())));
    Ok(())
}

#[test]
fn test_delete_with_limit() -> Result<()> {
    let store = people_store()?;
    let mut arena = ExprArena::new();
    let last_name = arena.column("last_name");
    let doe = arena.string("Doe");
    let statement = Statement::Delete(Delete {
        table: ObjectName::new("people"),
        selection: Some(arena.eq(last_name, doe)),
        limit: Some(arena.int(1)),
    });
    let deleted = execute_write(&store, &ParsedStatement::new(arena, statement), &[])?;

    assert_eq!(deleted, 1);
    assert_eq!(store.len(NAMESPACE, "people"), 4);
    assert_eq!(bin(store.as_ref(), 2, "first_name")?, None);
    assert!(bin(store.as_ref(), 5, "first_name")?.is_some());
    Ok(())
}

#[test]
fn test_truncate() -> Result<()> {
    let store = people_store()?;
    let truncate = |table: &str| ParsedStatement::new(ExprArena::new(), Statement::Truncate { table: ObjectName::new(table) });

    execute_write(&store, &truncate("people"), &[])?;
    assert_eq!(store.len(NAMESPACE, "people"), 0);

    let err = execute_write(&store, &truncate("nowhere"), &[]).unwrap_err();
    assert!(matches!(err.downcast_ref::<QueryError>(), Some(QueryError::MissingTable(_))));
    Ok(())
}

#[test]
fn test_create_and_drop_index() -> Result<()> {
    let store = people_store()?;
    let create = ParsedStatement::new(
        ExprArena::new(),
        Statement::CreateIndex(CreateIndex {
            name: "people_last".to_string(),
            table: ObjectName::new("people"),
            column: "last_name".to_string(),
            index_type: IndexType::String,
        }),
    );
    execute_write(&store, &create, &[])?;
    let indexes = store.indexes(NAMESPACE)?;
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].bin, "last_name");

    let drop = ParsedStatement::new(
        ExprArena::new(),
        Statement::DropIndex {
            name: "people_last".to_string(),
            table: ObjectName::new("people"),
        },
    );
    execute_write(&store, &drop, &[])?;
    assert!(store.indexes(NAMESPACE)?.is_empty());
    Ok(())
}
