use std::fmt;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::query::executor::result::{DataValue, QueryError, QueryResult};

/// Name of the pseudo-column that exposes a record's user key
pub const PRIMARY_KEY: &str = "PK";

/// Name of the pseudo-column that exposes a record's key digest
pub const PRIMARY_KEY_DIGEST: &str = "PK_DIGEST";

/// Record bins in insertion order
pub type Bins = LinkedHashMap<String, DataValue>;

/// User-supplied part of a record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserKey {
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl UserKey {
    /// Convert a value into a key. Integers, strings and blobs map directly,
    /// other numbers are truncated to integers and everything else is rejected.
    pub fn from_value(value: &DataValue) -> QueryResult<Self> {
        match value {
            DataValue::Integer(i) => Ok(UserKey::Integer(*i)),
            DataValue::Text(s) => Ok(UserKey::Text(s.clone())),
            DataValue::Blob(b) => Ok(UserKey::Blob(b.clone())),
            DataValue::Float(f) => Ok(UserKey::Integer(*f as i64)),
            DataValue::Boolean(b) => Ok(UserKey::Integer(*b as i64)),
            DataValue::Null => Err(QueryError::TypeMismatch("Primary key cannot be null".to_string())),
            DataValue::List(_) => Err(QueryError::TypeMismatch(format!(
                "Primary key must be an integer, string or blob, got {}",
                value
            ))),
        }
    }

    pub fn to_value(&self) -> DataValue {
        match self {
            UserKey::Integer(i) => DataValue::Integer(*i),
            UserKey::Text(s) => DataValue::Text(s.clone()),
            UserKey::Blob(b) => DataValue::Blob(b.clone()),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Integer(i) => write!(f, "{}", i),
            UserKey::Text(s) => write!(f, "'{}'", s),
            UserKey::Blob(b) => write!(f, "X'{}'", hex::encode(b)),
        }
    }
}

/// Fully qualified record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub set: String,
    pub user_key: UserKey,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_key: UserKey) -> Self {
        RecordKey {
            namespace: namespace.into(),
            set: set.into(),
            user_key,
        }
    }

    /// Digest identifying the record inside its namespace
    pub fn digest(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.set.as_bytes());
        match &self.user_key {
            UserKey::Integer(i) => {
                hasher.update([1u8]);
                hasher.update(i.to_be_bytes());
            }
            UserKey::Text(s) => {
                hasher.update([3u8]);
                hasher.update(s.as_bytes());
            }
            UserKey::Blob(b) => {
                hasher.update([4u8]);
                hasher.update(b);
            }
        }
        hasher.finalize().to_vec()
    }
}

/// A record as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    pub bins: Bins,
}

impl Record {
    pub fn new(key: RecordKey, bins: Bins) -> Self {
        Record { key, bins }
    }

    pub fn bin(&self, name: &str) -> Option<&DataValue> {
        self.bins.get(name)
    }
}
