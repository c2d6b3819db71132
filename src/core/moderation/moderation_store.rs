// Storage port for the moderation layer.
//
// The core defines WHAT it needs from persistence; `infra` provides the
// in-memory and SQLite implementations.

use super::moderation_errors::{ChainWriteError, StoreError};
use super::moderation_models::{EntityType, MonitorEntry, ObjectId, ObjectRef, Record, Status};
use super::query::Query;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A record together with its monitor entry, if one was ever written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub record: Record,
    pub entry: Option<MonitorEntry>,
}

impl StoredObject {
    /// Records without an entry read as pending.
    pub fn status(&self) -> Status {
        self.entry
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(Status::Pending)
    }

    pub fn entry_or_pending(&self) -> MonitorEntry {
        self.entry
            .clone()
            .unwrap_or_else(|| MonitorEntry::pending(self.record.object.clone(), None))
    }
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Persist a new record. With `id: None` the store assigns the next key
    /// for the type; otherwise the given key is used (shared parent keys).
    async fn insert_record(
        &self,
        entity_type: &EntityType,
        id: Option<ObjectId>,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError>;

    /// Overwrite the fields of an existing record.
    async fn update_record(&self, record: &Record) -> Result<(), StoreError>;

    async fn get_record(&self, object: &ObjectRef) -> Result<Option<Record>, StoreError>;

    /// Delete the records and their entries in one go.
    /// Returns how many records existed.
    async fn delete_records(&self, objects: &[ObjectRef]) -> Result<usize, StoreError>;

    async fn get_entry(&self, object: &ObjectRef) -> Result<Option<MonitorEntry>, StoreError>;

    /// Write a unit of work. Transactional stores keep all or nothing.
    async fn save_entries(&self, entries: &[MonitorEntry]) -> Result<(), ChainWriteError>;

    /// Records matching the query, ordered and limited as it asks.
    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError>;

    async fn count(&self, query: &Query) -> Result<usize, StoreError> {
        Ok(self.find(query).await?.len())
    }
}
