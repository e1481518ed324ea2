//! In-memory reference backends.
//!
//! Safe for concurrent readers and writers; conditional writes are checked under
//! the write lock so racing state transitions serialize correctly. Used by the
//! test suites and by the local composition root for record storage.

use crate::store::{BlobStore, RecordPage, RecordStore, StoreError, StoredRecord, WriteCondition};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

fn lock_poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

/// In-memory blob store keyed by object name.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().map_err(lock_poisoned)?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().map_err(lock_poisoned)?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// In-memory record table keyed by `(pk, sk)`.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<(String, String), StoredRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn condition_holds(
        existing: Option<&StoredRecord>,
        condition: &WriteCondition,
    ) -> bool {
        match condition {
            WriteCondition::None => true,
            WriteCondition::Absent => existing.is_none(),
            WriteCondition::FieldEquals { field, value } => existing
                .map(|record| record.body.get(field) == Some(value))
                .unwrap_or(false),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<StoredRecord>, StoreError> {
        let records = self.records.read().map_err(lock_poisoned)?;
        Ok(records.get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn put(&self, record: StoredRecord, condition: WriteCondition) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(lock_poisoned)?;
        let key = (record.pk.clone(), record.sk.clone());
        if !Self::condition_holds(records.get(&key), &condition) {
            return Err(StoreError::ConditionFailed {
                pk: record.pk,
                sk: record.sk,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    async fn query(
        &self,
        pk: &str,
        sk_prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, StoreError> {
        let records = self.records.read().map_err(lock_poisoned)?;
        let mut items = Vec::new();
        let mut next_cursor = None;
        for ((record_pk, record_sk), record) in
            records.range((pk.to_string(), sk_prefix.to_string())..)
        {
            if record_pk != pk || !record_sk.starts_with(sk_prefix) {
                break;
            }
            if let Some(cursor) = cursor {
                if record_sk.as_str() <= cursor {
                    continue;
                }
            }
            if items.len() == limit {
                next_cursor = items
                    .last()
                    .map(|last: &StoredRecord| last.sk.clone());
                break;
            }
            items.push(record.clone());
        }
        Ok(RecordPage { items, next_cursor })
    }

    async fn query_index(
        &self,
        index_key: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, StoreError> {
        let records = self.records.read().map_err(lock_poisoned)?;
        let mut items = Vec::new();
        let mut next_cursor = None;
        for ((record_pk, record_sk), record) in records.iter() {
            if record.index_key.as_deref() != Some(index_key) {
                continue;
            }
            let position = format!("{record_pk}\u{1f}{record_sk}");
            if let Some(cursor) = cursor {
                if position.as_str() <= cursor {
                    continue;
                }
            }
            if items.len() == limit {
                next_cursor = items
                    .last()
                    .map(|last: &StoredRecord| format!("{}\u{1f}{}", last.pk, last.sk));
                break;
            }
            items.push(record.clone());
        }
        Ok(RecordPage { items, next_cursor })
    }

    async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(lock_poisoned)?;
        records.remove(&(pk.to_string(), sk.to_string()));
        Ok(())
    }
}
