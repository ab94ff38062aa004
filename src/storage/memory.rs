// In-Memory Store
//
// Reference implementation of `KeyValueStore`. Sets keep insertion order so
// scans are deterministic, and every access path is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use linked_hash_map::LinkedHashMap;
use log::debug;
use parking_lot::RwLock;

use super::filter::matches;
use super::{AggregateCall, IndexDefinition, KeyValueStore, ScanRequest, WriteMode};
use crate::common::types::{Bins, Record, RecordKey, UserKey};
use crate::query::executor::operators::agg::GroupReducer;
use crate::query::executor::result::{QueryError, QueryResult};

type SetId = (String, String);

/// Number of calls per access path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub gets: usize,
    pub batch_gets: usize,
    pub scans: usize,
    pub aggregations: usize,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    batch_gets: AtomicUsize,
    scans: AtomicUsize,
    aggregations: AtomicUsize,
}

/// Thread-safe in-memory key/value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: RwLock<HashMap<SetId, LinkedHashMap<UserKey, Bins>>>,
    indexes: RwLock<Vec<IndexDefinition>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the access counters
    pub fn stats(&self) -> AccessStats {
        AccessStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            batch_gets: self.counters.batch_gets.load(Ordering::Relaxed),
            scans: self.counters.scans.load(Ordering::Relaxed),
            aggregations: self.counters.aggregations.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.gets.store(0, Ordering::Relaxed);
        self.counters.batch_gets.store(0, Ordering::Relaxed);
        self.counters.scans.store(0, Ordering::Relaxed);
        self.counters.aggregations.store(0, Ordering::Relaxed);
    }

    /// Number of records in a set
    pub fn len(&self, namespace: &str, set: &str) -> usize {
        self.sets
            .read()
            .get(&(namespace.to_string(), set.to_string()))
            .map_or(0, |records| records.len())
    }

    fn lookup(&self, key: &RecordKey) -> Option<Record> {
        let sets = self.sets.read();
        let bins = sets.get(&(key.namespace.clone(), key.set.clone()))?.get(&key.user_key)?;
        Some(Record::new(key.clone(), bins.clone()))
    }

    /// Records matching a scan request, in set order
    fn collect(&self, request: &ScanRequest<'_>) -> QueryResult<Vec<Record>> {
        if let Some(filter) = request.filter {
            let indexed = self.indexes.read().iter().any(|index| {
                index.namespace == request.namespace && index.set == request.set && index.bin == filter.bin()
            });
            if !indexed {
                return Err(QueryError::StorageError(format!(
                    "Index not found for {}.{}.{}",
                    request.namespace,
                    request.set,
                    filter.bin()
                )));
            }
        }

        let candidates: Vec<Record> = {
            let sets = self.sets.read();
            match sets.get(&(request.namespace.to_string(), request.set.to_string())) {
                Some(records) => records
                    .iter()
                    .map(|(user_key, bins)| {
                        Record::new(
                            RecordKey::new(request.namespace, request.set, user_key.clone()),
                            bins.clone(),
                        )
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut out = Vec::new();
        for record in candidates {
            if request.filter.is_some_and(|filter| !filter.accepts(&record)) {
                continue;
            }
            if matches(request.instructions, &record)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &RecordKey) -> QueryResult<Option<Record>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.lookup(key))
    }

    fn get_many(&self, keys: &[RecordKey]) -> QueryResult<Vec<Option<Record>>> {
        self.counters.batch_gets.fetch_add(1, Ordering::Relaxed);
        Ok(keys.iter().map(|key| self.lookup(key)).collect())
    }

    fn scan(&self, request: &ScanRequest<'_>, visitor: &mut dyn FnMut(Record) -> QueryResult<bool>) -> QueryResult<()> {
        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Scanning {}.{} (index filter: {:?}, {} instructions)",
            request.namespace,
            request.set,
            request.filter,
            request.instructions.len()
        );
        for record in self.collect(request)? {
            if !visitor(record)? {
                break;
            }
        }
        Ok(())
    }

    fn aggregate(&self, request: &ScanRequest<'_>, call: &AggregateCall) -> QueryResult<Vec<Bins>> {
        self.counters.aggregations.fetch_add(1, Ordering::Relaxed);
        let mut reducer = GroupReducer::from_call(call)?;
        for record in self.collect(request)? {
            reducer.feed(|bin| record.bin(bin));
        }
        Ok(reducer.finish())
    }

    fn put(&self, key: &RecordKey, bins: Bins, mode: WriteMode) -> QueryResult<bool> {
        let mut sets = self.sets.write();
        let records = sets.entry((key.namespace.clone(), key.set.clone())).or_default();
        if let Some(existing) = records.get_mut(&key.user_key) {
            if mode == WriteMode::CreateOnly {
                return Ok(false);
            }
            for (name, value) in bins {
                if value.is_null() {
                    existing.remove(&name);
                } else {
                    existing.insert(name, value);
                }
            }
            return Ok(true);
        }
        let bins: Bins = bins.into_iter().filter(|(_, value)| !value.is_null()).collect();
        records.insert(key.user_key.clone(), bins);
        Ok(true)
    }

    fn delete(&self, key: &RecordKey) -> QueryResult<bool> {
        let mut sets = self.sets.write();
        Ok(sets
            .get_mut(&(key.namespace.clone(), key.set.clone()))
            .and_then(|records| records.remove(&key.user_key))
            .is_some())
    }

    fn truncate(&self, namespace: &str, set: &str) -> QueryResult<bool> {
        let mut sets = self.sets.write();
        match sets.get_mut(&(namespace.to_string(), set.to_string())) {
            Some(records) => {
                records.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn create_index(&self, index: IndexDefinition) -> QueryResult<()> {
        let mut indexes = self.indexes.write();
        if indexes
            .iter()
            .any(|existing| existing.namespace == index.namespace && existing.name == index.name)
        {
            return Err(QueryError::StorageError(format!("Index {} already exists", index.name)));
        }
        indexes.push(index);
        Ok(())
    }

    fn drop_index(&self, namespace: &str, name: &str) -> QueryResult<()> {
        let mut indexes = self.indexes.write();
        let before = indexes.len();
        indexes.retain(|index| !(index.namespace == namespace && index.name == name));
        if indexes.len() == before {
            return Err(QueryError::StorageError(format!("Index {} not found", name)));
        }
        Ok(())
    }

    fn indexes(&self, namespace: &str) -> QueryResult<Vec<IndexDefinition>> {
        Ok(self
            .indexes
            .read()
            .iter()
            .filter(|index| index.namespace == namespace)
            .cloned()
            .collect())
    }
}
