// In-memory implementation of ModerationStore.
//
// Used by the tests and by short-lived tools that do not need persistence.
// Entry batches are applied one by one, so a batch is not atomic here.

use crate::core::moderation::{
    ChainWriteError, EntityType, ModerationStore, MonitorEntry, ObjectId, ObjectRef, Query,
    Record, StoreError, StoredObject,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

pub struct InMemoryModerationStore {
    records: DashMap<ObjectRef, Record>,
    entries: DashMap<ObjectRef, MonitorEntry>,
    /// Highest key handed out per type
    last_ids: DashMap<EntityType, ObjectId>,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            entries: DashMap::new(),
            last_ids: DashMap::new(),
        }
    }
}

impl Default for InMemoryModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModerationStore for InMemoryModerationStore {
    async fn insert_record(
        &self,
        entity_type: &EntityType,
        id: Option<ObjectId>,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        // The entry() guard serializes key assignment per type
        let mut last = self.last_ids.entry(entity_type.clone()).or_insert(0);
        let id = match id {
            Some(id) => id,
            None => *last + 1,
        };

        let object = ObjectRef::new(entity_type.clone(), id);
        if self.records.contains_key(&object) {
            return Err(StoreError::StorageError(format!(
                "{} already exists",
                object
            )));
        }
        *last = (*last).max(id);
        drop(last);

        let record = Record::new(object.clone(), fields);
        self.records.insert(object, record.clone());
        Ok(record)
    }

    async fn update_record(&self, record: &Record) -> Result<(), StoreError> {
        match self.records.get_mut(&record.object) {
            Some(mut stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(StoreError::StorageError(format!(
                "{} does not exist",
                record.object
            ))),
        }
    }

    async fn get_record(&self, object: &ObjectRef) -> Result<Option<Record>, StoreError> {
        Ok(self.records.get(object).map(|r| r.clone()))
    }

    async fn delete_records(&self, objects: &[ObjectRef]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for object in objects {
            if self.records.remove(object).is_some() {
                removed += 1;
            }
            self.entries.remove(object);
        }
        Ok(removed)
    }

    async fn get_entry(&self, object: &ObjectRef) -> Result<Option<MonitorEntry>, StoreError> {
        Ok(self.entries.get(object).map(|e| e.clone()))
    }

    async fn save_entries(&self, entries: &[MonitorEntry]) -> Result<(), ChainWriteError> {
        for entry in entries {
            self.entries.insert(entry.target.clone(), entry.clone());
        }
        Ok(())
    }

    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError> {
        let mut found: Vec<StoredObject> = self
            .records
            .iter()
            .filter(|r| r.entity_type() == &query.entity_type)
            .map(|r| StoredObject {
                record: r.value().clone(),
                entry: self.entries.get(r.key()).map(|e| e.clone()),
            })
            .filter(|stored| query.matches(&stored.record, stored.status()))
            .collect();

        found.sort_by(|a, b| query.compare(&a.record, &b.record));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}
