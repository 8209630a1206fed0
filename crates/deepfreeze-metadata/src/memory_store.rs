use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use deepfreeze_core::{
    CoreError, CoreResult, DocType, RecordVersion, StatusRecord, StatusStore, Versioned,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Value,
    version: RecordVersion,
}

/// Status store held in process memory.
///
/// Documents are kept in serialized form so reads go through the same
/// validation path as the persistent backends. Write failures and
/// concurrent writers can be simulated to exercise error handling in callers.
#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    documents: Arc<RwLock<BTreeMap<String, StoredDocument>>>,
    write_failures: Arc<RwLock<VecDeque<String>>>,
    interleaved_writes: Arc<RwLock<usize>>,
}

impl MemoryStatusStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write with `StoreUnavailable`
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.write_failures.write().push_back(message.into());
    }

    /// Let another writer touch the record just before each of the next
    /// `count` conditional writes, so those writes lose with `Conflict`.
    pub fn interleave_writes(&self, count: usize) {
        *self.interleaved_writes.write() = count;
    }

    /// Store a raw document, bypassing validation
    pub fn insert_raw(&self, id: impl Into<String>, body: Value) {
        self.documents.write().insert(
            id.into(),
            StoredDocument {
                body,
                version: RecordVersion::INITIAL,
            },
        );
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn take_write_failure(&self) -> CoreResult<()> {
        match self.write_failures.write().pop_front() {
            Some(message) => Err(CoreError::StoreUnavailable(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn save(&self, record: &StatusRecord) -> CoreResult<RecordVersion> {
        self.take_write_failure()?;
        let id = record.id();
        let body = record.to_document()?;

        let mut documents = self.documents.write();
        let version = documents
            .get(&id)
            .map_or(RecordVersion::INITIAL, |existing| existing.version.next());
        documents.insert(id.clone(), StoredDocument { body, version });

        debug!(id = %id, doctype = %record.doctype(), seq_no = version.seq_no, "Saved record");
        Ok(version)
    }

    async fn save_if_version(
        &self,
        record: &StatusRecord,
        expected: RecordVersion,
    ) -> CoreResult<RecordVersion> {
        self.take_write_failure()?;
        let id = record.id();
        let body = record.to_document()?;

        let mut documents = self.documents.write();
        let existing = documents
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("record", id.clone()))?;
        {
            let mut interleaved = self.interleaved_writes.write();
            if *interleaved > 0 {
                *interleaved -= 1;
                existing.version = existing.version.next();
            }
        }
        if existing.version != expected {
            return Err(CoreError::conflict(id));
        }
        let version = expected.next();
        documents.insert(id, StoredDocument { body, version });
        Ok(version)
    }

    async fn get(&self, id: &str) -> CoreResult<Versioned<StatusRecord>> {
        let stored = self
            .documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("record", id))?;
        Ok(Versioned {
            record: StatusRecord::from_document(id, stored.body)?,
            version: stored.version,
        })
    }

    async fn update(&self, id: &str, fields: &Map<String, Value>) -> CoreResult<StatusRecord> {
        self.take_write_failure()?;

        // Held across read-merge-write so concurrent updates serialize.
        let mut documents = self.documents.write();
        let existing = documents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("record", id))?;

        let merged = StatusRecord::from_document(id, existing.body)?.merged(fields)?;
        documents.insert(
            id.to_string(),
            StoredDocument {
                body: merged.to_document()?,
                version: existing.version.next(),
            },
        );
        Ok(merged)
    }

    async fn list(&self, doctype: DocType) -> CoreResult<Vec<StatusRecord>> {
        let documents = self.documents.read();
        documents
            .iter()
            .filter(|(_, doc)| doc.body.get("doctype").and_then(Value::as_str) == Some(doctype.as_str()))
            .map(|(id, doc)| StatusRecord::from_document(id, doc.body.clone()))
            .collect()
    }
}
