//! Typed repository over the record store.
//!
//! Owns the composite-key scheme (`KB_DOC#<id>`/`METADATA`, `USER#<id>`/`QUERY#<id>`,
//! `USER#<id>`/`ANALYSIS#<id>`) and serializes the typed records into store items.
//! Every status transition is a conditional write keyed on the expected prior
//! status, so two racing invocations cannot both complete the same record.

use crate::model::{AnalysisRecord, Document, DocumentCategory, QueryRecord, Status};
use crate::store::{RecordStore, StoreError, StoredRecord, WriteCondition};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;

const DOCUMENT_SK: &str = "METADATA";
const QUERY_SK_PREFIX: &str = "QUERY#";
const ANALYSIS_SK_PREFIX: &str = "ANALYSIS#";
const RATE_LIMIT_PAGE: usize = 200;

const ALL_CATEGORIES: [DocumentCategory; 4] = [
    DocumentCategory::Policies,
    DocumentCategory::Regulations,
    DocumentCategory::Standards,
    DocumentCategory::Procedures,
];

fn document_pk(document_id: &str) -> String {
    format!("KB_DOC#{document_id}")
}

fn user_pk(user_id: &str) -> String {
    format!("USER#{user_id}")
}

fn category_index(category: DocumentCategory) -> String {
    format!("KB_CATEGORY#{category}")
}

fn analysis_status_index(status: Status) -> String {
    format!("ANALYSIS_STATUS#{status}")
}

fn encode_body<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Corrupt(format!("encode record: {err}")))
}

fn decode_body<T: serde::de::DeserializeOwned>(record: StoredRecord) -> Result<T, StoreError> {
    serde_json::from_value(record.body)
        .map_err(|err| StoreError::Corrupt(format!("decode {}/{}: {err}", record.pk, record.sk)))
}

/// One page of typed records plus the cursor for the next page.
#[derive(Clone, Debug)]
pub struct TypedPage<T> {
    /// Decoded records in this page.
    pub items: Vec<T>,
    /// Opaque cursor; `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Typed access to documents, query records, and analysis records.
pub struct RecordRepository {
    records: Arc<dyn RecordStore>,
}

impl RecordRepository {
    /// Create a repository over the given record store.
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    fn document_item(document: &Document) -> Result<StoredRecord, StoreError> {
        Ok(StoredRecord {
            pk: document_pk(&document.id),
            sk: DOCUMENT_SK.to_string(),
            index_key: Some(category_index(document.category)),
            body: encode_body(document)?,
        })
    }

    /// Persist a newly registered document; fails if the id already exists.
    pub async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        self.records
            .put(Self::document_item(document)?, WriteCondition::Absent)
            .await
    }

    /// Persist a document state transition, conditional on the prior status.
    pub async fn update_document(
        &self,
        document: &Document,
        expected: Status,
    ) -> Result<(), StoreError> {
        self.records
            .put(
                Self::document_item(document)?,
                WriteCondition::FieldEquals {
                    field: "status".to_string(),
                    value: json!(expected.as_str()),
                },
            )
            .await
    }

    /// Fetch a document by id.
    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        match self.records.get(&document_pk(document_id), DOCUMENT_SK).await? {
            Some(record) => Ok(Some(decode_body(record)?)),
            None => Ok(None),
        }
    }

    /// Remove a document record.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.records.delete(&document_pk(document_id), DOCUMENT_SK).await
    }

    /// List documents, optionally restricted to one category.
    ///
    /// Filtered listings page through the category index directly. Unfiltered
    /// listings walk the fixed category set; their cursor encodes the category
    /// being walked plus the position within it, so the no-filter listing is
    /// pageable the same way.
    pub async fn list_documents(
        &self,
        category: Option<DocumentCategory>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<TypedPage<Document>, StoreError> {
        match category {
            Some(category) => {
                let page = self
                    .records
                    .query_index(&category_index(category), limit, cursor)
                    .await?;
                let items = page
                    .items
                    .into_iter()
                    .map(decode_body)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TypedPage {
                    items,
                    next_cursor: page.next_cursor,
                })
            }
            None => self.list_all_documents(limit, cursor).await,
        }
    }

    async fn list_all_documents(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<TypedPage<Document>, StoreError> {
        let (start_category, mut inner_cursor) = match cursor {
            Some(cursor) => {
                let (category, inner) = cursor
                    .split_once('|')
                    .ok_or_else(|| StoreError::Corrupt(format!("bad listing cursor: {cursor}")))?;
                let category: DocumentCategory = category
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("bad listing cursor: {cursor}")))?;
                let inner = (!inner.is_empty()).then(|| inner.to_string());
                (category, inner)
            }
            None => (ALL_CATEGORIES[0], None),
        };

        let start = ALL_CATEGORIES
            .iter()
            .position(|candidate| *candidate == start_category)
            .unwrap_or(0);
        let mut items = Vec::new();
        for (position, category) in ALL_CATEGORIES.iter().enumerate().skip(start) {
            // The inner cursor only applies to the category it was issued in.
            let page_cursor = inner_cursor.take();
            let page = self
                .records
                .query_index(
                    &category_index(*category),
                    limit - items.len(),
                    page_cursor.as_deref(),
                )
                .await?;
            for record in page.items {
                items.push(decode_body(record)?);
            }
            if items.len() >= limit {
                let next_cursor = match page.next_cursor {
                    Some(inner) => Some(format!("{category}|{inner}")),
                    None => ALL_CATEGORIES
                        .get(position + 1)
                        .map(|next| format!("{next}|")),
                };
                return Ok(TypedPage { items, next_cursor });
            }
        }
        Ok(TypedPage {
            items,
            next_cursor: None,
        })
    }

    /// Persist an admitted query record; fails if the id already exists.
    pub async fn insert_query_record(&self, record: &QueryRecord) -> Result<(), StoreError> {
        let item = StoredRecord {
            pk: user_pk(&record.user_id),
            sk: format!("{QUERY_SK_PREFIX}{}", record.query_id),
            index_key: None,
            body: encode_body(record)?,
        };
        self.records.put(item, WriteCondition::Absent).await
    }

    /// Persist a query record's terminal transition, conditional on `pending`.
    pub async fn finalize_query_record(&self, record: &QueryRecord) -> Result<(), StoreError> {
        let item = StoredRecord {
            pk: user_pk(&record.user_id),
            sk: format!("{QUERY_SK_PREFIX}{}", record.query_id),
            index_key: None,
            body: encode_body(record)?,
        };
        self.records
            .put(
                item,
                WriteCondition::FieldEquals {
                    field: "status".to_string(),
                    value: json!(Status::Pending.as_str()),
                },
            )
            .await
    }

    /// Fetch a single query record owned by `user_id`.
    pub async fn get_query_record(
        &self,
        user_id: &str,
        query_id: &str,
    ) -> Result<Option<QueryRecord>, StoreError> {
        let sk = format!("{QUERY_SK_PREFIX}{query_id}");
        match self.records.get(&user_pk(user_id), &sk).await? {
            Some(record) => Ok(Some(decode_body(record)?)),
            None => Ok(None),
        }
    }

    /// Remove a query record owned by `user_id`.
    pub async fn delete_query_record(
        &self,
        user_id: &str,
        query_id: &str,
    ) -> Result<(), StoreError> {
        let sk = format!("{QUERY_SK_PREFIX}{query_id}");
        self.records.delete(&user_pk(user_id), &sk).await
    }

    /// Page through a user's query records in sort-key order.
    pub async fn query_history(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<TypedPage<QueryRecord>, StoreError> {
        let page = self
            .records
            .query(&user_pk(user_id), QUERY_SK_PREFIX, limit, cursor)
            .await?;
        let items = page
            .items
            .into_iter()
            .map(decode_body)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypedPage {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// Collect all of a user's query records created at or after `cutoff`.
    pub async fn user_queries_since(
        &self,
        user_id: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<QueryRecord>, StoreError> {
        let mut matches = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .query_history(user_id, RATE_LIMIT_PAGE, cursor.as_deref())
                .await?;
            for record in page.items {
                if record.created_at >= cutoff {
                    matches.push(record);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(matches)
    }

    /// Persist an admitted analysis record at `processing`.
    pub async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let item = StoredRecord {
            pk: user_pk(&record.user_id),
            sk: format!("{ANALYSIS_SK_PREFIX}{}", record.analysis_id),
            index_key: Some(analysis_status_index(record.status)),
            body: encode_body(record)?,
        };
        self.records.put(item, WriteCondition::Absent).await
    }

    /// Persist an analysis record's terminal transition, conditional on `processing`.
    pub async fn finalize_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let item = StoredRecord {
            pk: user_pk(&record.user_id),
            sk: format!("{ANALYSIS_SK_PREFIX}{}", record.analysis_id),
            index_key: Some(analysis_status_index(record.status)),
            body: encode_body(record)?,
        };
        self.records
            .put(
                item,
                WriteCondition::FieldEquals {
                    field: "status".to_string(),
                    value: json!(Status::Processing.as_str()),
                },
            )
            .await
    }

    /// Page through a user's analysis records in sort-key order.
    pub async fn list_analyses(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<TypedPage<AnalysisRecord>, StoreError> {
        let page = self
            .records
            .query(&user_pk(user_id), ANALYSIS_SK_PREFIX, limit, cursor)
            .await?;
        let items = page
            .items
            .into_iter()
            .map(decode_body)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypedPage {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// Remove an analysis record owned by `user_id`.
    pub async fn delete_analysis(
        &self,
        user_id: &str,
        analysis_id: &str,
    ) -> Result<(), StoreError> {
        let sk = format!("{ANALYSIS_SK_PREFIX}{analysis_id}");
        self.records.delete(&user_pk(user_id), &sk).await
    }

    /// Fetch an analysis record owned by `user_id`.
    pub async fn get_analysis(
        &self,
        user_id: &str,
        analysis_id: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        let sk = format!("{ANALYSIS_SK_PREFIX}{analysis_id}");
        match self.records.get(&user_pk(user_id), &sk).await? {
            Some(record) => Ok(Some(decode_body(record)?)),
            None => Ok(None),
        }
    }
}
