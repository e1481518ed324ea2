//! Blob and record storage abstractions.
//!
//! The pipelines never talk to a concrete backend. They depend on [`BlobStore`]
//! (object storage for raw uploads and chunk blobs) and [`RecordStore`] (a
//! composite-key record table with conditional writes), both injected at the
//! composition root. Shipped backends: in-memory stores for tests and local
//! serving, and a filesystem blob store.

/// Document-granularity chunk persistence.
pub mod chunks;
/// Filesystem-backed blob store.
pub mod fs;
/// In-memory reference backends.
pub mod memory;
/// Typed repository over the record store.
pub mod records;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),
    /// A conditional write observed a state other than the expected one.
    #[error("conditional write failed for {pk}/{sk}")]
    ConditionFailed {
        /// Partition key of the record.
        pk: String,
        /// Sort key of the record.
        sk: String,
    },
    /// The backend could not be reached or refused the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    /// A stored item could not be decoded into its expected shape.
    #[error("stored item could not be decoded: {0}")]
    Corrupt(String),
}

/// Object storage for raw uploads and chunk blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
    /// Remove the object under `key`; removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Enumerate keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// A record addressed by a composite partition/sort key.
///
/// `index_key` is an optional secondary-index partition value (category or
/// status) supporting the listing queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Partition key, e.g. `USER#<id>` or `KB_DOC#<id>`.
    pub pk: String,
    /// Sort key, e.g. `QUERY#<id>` or `METADATA`.
    pub sk: String,
    /// Secondary-index partition value, when the record is listable.
    pub index_key: Option<String>,
    /// Serialized record body.
    pub body: Value,
}

/// Precondition applied to a record write.
#[derive(Clone, Debug)]
pub enum WriteCondition {
    /// Unconditional write.
    None,
    /// Succeed only if no record exists under the key.
    Absent,
    /// Succeed only if the existing record's body field equals the value.
    FieldEquals {
        /// Body field to compare.
        field: String,
        /// Expected current value.
        value: Value,
    },
}

/// One page of records plus the cursor for the next page.
#[derive(Clone, Debug, Default)]
pub struct RecordPage {
    /// Records in this page, ordered by sort key.
    pub items: Vec<StoredRecord>,
    /// Opaque cursor; `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Composite-key record table with conditional writes and cursor pagination.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a single record.
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<StoredRecord>, StoreError>;
    /// Write a record subject to `condition`.
    async fn put(&self, record: StoredRecord, condition: WriteCondition) -> Result<(), StoreError>;
    /// Page through records under `pk` whose sort key starts with `sk_prefix`.
    async fn query(
        &self,
        pk: &str,
        sk_prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, StoreError>;
    /// Page through records whose secondary-index value equals `index_key`.
    async fn query_index(
        &self,
        index_key: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, StoreError>;
    /// Remove a record; removing a missing record is not an error.
    async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError>;
}
