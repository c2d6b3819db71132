// SQLite implementation of ModerationStore.
//
// Records keep their fields as a JSON document; monitor entries live in their
// own table keyed by (entity_type, object_id). Entry batches run inside one
// transaction, so a failed batch leaves nothing behind.

use crate::core::moderation::{
    ChainWriteError, EntityType, ModerationStore, MonitorEntry, ObjectId, ObjectRef, Query,
    Record, Status, StatusScope, StoreError, StoredObject,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let in_memory = database_url.contains(":memory:");
        let path_str = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !in_memory && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        // Every connection to :memory: opens its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&conn_str)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(database = %database_url, "Moderation store ready");
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_records (
                entity_type TEXT NOT NULL,
                id INTEGER NOT NULL,
                fields TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (entity_type, id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_entries (
                entity_type TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'IP',
                status_by TEXT,
                status_date TEXT NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (entity_type, object_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_monitor_entries_status ON monitor_entries(entity_type, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(entity_type: &EntityType, row: &SqliteRow) -> Result<Record, StoreError> {
        let id: i64 = row.get("id");
        let raw: String = row.get("fields");
        let fields: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(Record::new(ObjectRef::new(entity_type.clone(), id), fields))
    }

    /// Columns are read from the left-joined entry side, so they may all be NULL.
    fn entry_from_row(object: &ObjectRef, row: &SqliteRow) -> Result<Option<MonitorEntry>, StoreError> {
        let code: Option<String> = row.get("status");
        let Some(code) = code else {
            return Ok(None);
        };

        let status = Status::from_code(&code)
            .ok_or_else(|| StoreError::StorageError(format!("Unknown status code '{}'", code)))?;
        let raw_date: String = row.get("status_date");
        let status_date = DateTime::parse_from_rfc3339(&raw_date)
            .map_err(|e| StoreError::StorageError(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Some(MonitorEntry {
            target: object.clone(),
            status,
            status_by: row.get("status_by"),
            status_date,
            notes: row.get::<Option<String>, _>("notes").unwrap_or_default(),
        }))
    }
}

// JSON path for a top-level field of the fields document.
fn field_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}

fn write_error(index: Option<usize>, e: impl ToString) -> ChainWriteError {
    ChainWriteError {
        failed_index: index,
        rolled_back: true,
        source: StoreError::StorageError(e.to_string()),
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn insert_record(
        &self,
        entity_type: &EntityType,
        id: Option<ObjectId>,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let raw = serde_json::to_string(&fields)?;

        let row = sqlx::query(
            r#"
            INSERT INTO monitor_records (entity_type, id, fields)
            VALUES (
                ?1,
                COALESCE(?2, (SELECT COALESCE(MAX(id), 0) + 1 FROM monitor_records WHERE entity_type = ?1)),
                ?3
            )
            RETURNING id
            "#,
        )
        .bind(entity_type.to_string())
        .bind(id)
        .bind(raw)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;

        let id: i64 = row.get(0);
        Ok(Record::new(ObjectRef::new(entity_type.clone(), id), fields))
    }

    async fn update_record(&self, record: &Record) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&record.fields)?;

        let result = sqlx::query("UPDATE monitor_records SET fields = ? WHERE entity_type = ? AND id = ?")
            .bind(raw)
            .bind(record.entity_type().to_string())
            .bind(record.id())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StorageError(format!(
                "{} does not exist",
                record.object
            )));
        }
        Ok(())
    }

    async fn get_record(&self, object: &ObjectRef) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT id, fields FROM monitor_records WHERE entity_type = ? AND id = ?")
            .bind(object.entity_type.to_string())
            .bind(object.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;

        row.map(|row| Self::record_from_row(&object.entity_type, &row))
            .transpose()
    }

    async fn delete_records(&self, objects: &[ObjectRef]) -> Result<usize, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;

        let mut removed = 0;
        for object in objects {
            let result = sqlx::query("DELETE FROM monitor_records WHERE entity_type = ? AND id = ?")
                .bind(object.entity_type.to_string())
                .bind(object.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::StorageError(e.to_string()))?;
            removed += result.rows_affected() as usize;

            sqlx::query("DELETE FROM monitor_entries WHERE entity_type = ? AND object_id = ?")
                .bind(object.entity_type.to_string())
                .bind(object.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::StorageError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(removed)
    }

    async fn get_entry(&self, object: &ObjectRef) -> Result<Option<MonitorEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT status, status_by, status_date, notes FROM monitor_entries WHERE entity_type = ? AND object_id = ?",
        )
        .bind(object.entity_type.to_string())
        .bind(object.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;

        match row {
            Some(row) => Self::entry_from_row(object, &row),
            None => Ok(None),
        }
    }

    async fn save_entries(&self, entries: &[MonitorEntry]) -> Result<(), ChainWriteError> {
        let mut tx = self.pool.begin().await.map_err(|e| write_error(None, e))?;

        for (index, entry) in entries.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO monitor_entries (entity_type, object_id, status, status_by, status_date, notes)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(entity_type, object_id) DO UPDATE SET
                    status = excluded.status,
                    status_by = excluded.status_by,
                    status_date = excluded.status_date,
                    notes = excluded.notes
                "#,
            )
            .bind(entry.target.entity_type.to_string())
            .bind(entry.target.id)
            .bind(entry.status.code())
            .bind(entry.status_by.as_deref())
            .bind(entry.status_date.to_rfc3339())
            .bind(entry.notes.as_str())
            .execute(&mut *tx)
            .await
            // Dropping the transaction rolls it back
            .map_err(|e| write_error(Some(index), e))?;
        }

        tx.commit().await.map_err(|e| write_error(None, e))?;
        Ok(())
    }

    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError> {
        let mut sql = String::from(
            r#"
            SELECT r.id, r.fields, e.status, e.status_by, e.status_date, e.notes
            FROM monitor_records r
            LEFT JOIN monitor_entries e
                ON e.entity_type = r.entity_type AND e.object_id = r.id
            WHERE r.entity_type = ?
            "#,
        );

        if let StatusScope::Only(_) = query.scope {
            sql.push_str(" AND COALESCE(e.status, 'IP') = ?");
        }
        if let Some(ids) = &query.ids {
            if ids.is_empty() {
                sql.push_str(" AND 0");
            } else {
                let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                sql.push_str(&format!(" AND r.id IN ({})", list.join(", ")));
            }
        }
        for filter in &query.filters {
            if filter.field == "id" {
                sql.push_str(" AND r.id = ?");
            } else if filter.value.is_null() {
                sql.push_str(" AND json_type(r.fields, ?) = 'null'");
            } else {
                sql.push_str(" AND json_extract(r.fields, ?) = json_extract(?, '$')");
            }
        }

        let mut statement = sqlx::query(&sql).bind(query.entity_type.to_string());
        if let StatusScope::Only(status) = query.scope {
            statement = statement.bind(status.code());
        }
        for filter in &query.filters {
            statement = if filter.field == "id" {
                statement.bind(filter.value.as_i64())
            } else if filter.value.is_null() {
                statement.bind(field_path(&filter.field))
            } else {
                statement
                    .bind(field_path(&filter.field))
                    .bind(filter.value.to_string())
            };
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;

        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = Self::record_from_row(&query.entity_type, row)?;
            let entry = Self::entry_from_row(&record.object, row)?;
            let stored = StoredObject { record, entry };
            // SQLite compares JSON booleans as integers, so re-check in process
            if query.matches(&stored.record, stored.status()) {
                found.push(stored);
            }
        }

        // Ordering stays in process so mixed value types sort like Query::compare
        found.sort_by(|a, b| query.compare(&a.record, &b.record));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn author() -> EntityType {
        EntityType::new("testapp", "author")
    }

    fn named(name: &str, age: i64) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("name".into(), json!(name));
        fields.insert("age".into(), json!(age));
        fields
    }

    fn approved(object: ObjectRef, by: &str) -> MonitorEntry {
        let mut entry = MonitorEntry::pending(object, Some(by.to_string()));
        entry.status = Status::Approved;
        entry.notes = "looks fine".to_string();
        entry
    }

    #[tokio::test]
    async fn test_records_and_entries_persist_across_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();

        let store = SqliteModerationStore::new(&path).await.unwrap();
        let record = store.insert_record(&author(), None, named("Adrian", 34)).await.unwrap();
        store
            .save_entries(&[approved(record.object.clone(), "moder")])
            .await
            .unwrap();
        drop(store);

        let reopened = SqliteModerationStore::new(&path).await.unwrap();
        let loaded = reopened.get_record(&record.object).await.unwrap().unwrap();
        let entry = reopened.get_entry(&record.object).await.unwrap().unwrap();

        assert_eq!(loaded.get("name"), Some(&json!("Adrian")));
        assert_eq!(entry.status, Status::Approved);
        assert_eq!(entry.status_by.as_deref(), Some("moder"));
        assert_eq!(entry.notes, "looks fine");
    }

    #[tokio::test]
    async fn test_keys_follow_explicit_ones() {
        let store = SqliteModerationStore::new("sqlite::memory:").await.unwrap();

        let first = store.insert_record(&author(), None, Map::new()).await.unwrap();
        let shared = store.insert_record(&author(), Some(7), Map::new()).await.unwrap();
        let next = store.insert_record(&author(), None, Map::new()).await.unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(shared.id(), 7);
        assert_eq!(next.id(), 8);
        assert!(store.insert_record(&author(), Some(7), Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_find_applies_status_and_field_filters() {
        let store = SqliteModerationStore::new("sqlite::memory:").await.unwrap();
        let mut ids = Vec::new();
        for (name, age) in [("Jacob", 35), ("Adrian", 34), ("Paul", 34)] {
            ids.push(store.insert_record(&author(), None, named(name, age)).await.unwrap());
        }
        store
            .save_entries(&[
                approved(ids[1].object.clone(), "moder"),
                approved(ids[2].object.clone(), "moder"),
            ])
            .await
            .unwrap();

        // No entry at all reads as pending
        let pending = store.find(&Query::all(author()).pending()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.get("name"), Some(&json!("Jacob")));
        assert!(pending[0].entry.is_none());

        let query = Query::approved_only(author()).filter("age", 34).order_by_desc("name");
        let names: Vec<_> = store
            .find(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.record.get("name").cloned())
            .collect();
        assert_eq!(names, vec![Some(json!("Paul")), Some(json!("Adrian"))]);

        let by_id = Query::all(author()).ids([ids[0].id(), ids[2].id()]).limit(1);
        assert_eq!(store.count(&by_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteModerationStore::new("sqlite::memory:").await.unwrap();
        let mut record = store.insert_record(&author(), None, named("Jacob", 35)).await.unwrap();
        store
            .save_entries(&[MonitorEntry::pending(record.object.clone(), None)])
            .await
            .unwrap();

        record.set("age", json!(53));
        store.update_record(&record).await.unwrap();
        let loaded = store.get_record(&record.object).await.unwrap().unwrap();
        assert_eq!(loaded.get("age"), Some(&json!(53)));

        let removed = store.delete_records(&[record.object.clone()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_record(&record.object).await.unwrap().is_none());
        assert!(store.get_entry(&record.object).await.unwrap().is_none());

        let missing = Record::new(ObjectRef::new(author(), 404), Map::new());
        assert!(store.update_record(&missing).await.is_err());
    }

    // Makes SQLite refuse approved entries for `entity_type`.
    async fn reject_approvals(store: &SqliteModerationStore, entity_type: &EntityType) {
        for event in ["INSERT", "UPDATE"] {
            let sql = format!(
                "CREATE TRIGGER reject_{event}_{model} BEFORE {event} ON monitor_entries \
                 WHEN NEW.entity_type = '{entity_type}' AND NEW.status = 'AP' \
                 BEGIN SELECT RAISE(ABORT, 'approval rejected'); END",
                event = event.to_lowercase(),
                model = entity_type.model(),
            );
            sqlx::query(&sql).execute(&store.pool).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_nothing() {
        let store = SqliteModerationStore::new("sqlite::memory:").await.unwrap();
        let book = EntityType::new("testapp", "book");
        let jacob = store.insert_record(&author(), None, named("Jacob", 35)).await.unwrap();
        let adrian = store.insert_record(&author(), None, named("Adrian", 34)).await.unwrap();
        let title = store.insert_record(&book, None, Map::new()).await.unwrap();
        store
            .save_entries(&[approved(jacob.object.clone(), "moder")])
            .await
            .unwrap();
        reject_approvals(&store, &book).await;

        let mut challenged = MonitorEntry::pending(jacob.object.clone(), Some("moder".into()));
        challenged.status = Status::Challenged;
        let err = store
            .save_entries(&[
                challenged,
                MonitorEntry::pending(adrian.object.clone(), None),
                approved(title.object.clone(), "moder"),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.failed_index, Some(2));
        assert!(err.rolled_back);
        // The update and the insert ahead of the failure were rolled back
        let entry = store.get_entry(&jacob.object).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Approved);
        assert!(store.get_entry(&adrian.object).await.unwrap().is_none());
        assert!(store.get_entry(&title.object).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_cascade_rolls_back_the_target() {
        use crate::core::moderation::{
            EntitySchema, MonitorError, Registration, RegistryBuilder, TransitionEngine,
        };
        use std::sync::Arc;

        let book = EntityType::new("testapp", "book");
        let ebook = EntityType::new("testapp", "ebook");
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                EntitySchema::new(book.clone()).primary_key("id").field("name"),
                Registration::default(),
            )
            .unwrap();
        builder
            .register(
                EntitySchema::new(ebook.clone()).primary_key("book_ptr").field("file_size"),
                Registration::default().cascade_to(book.clone()),
            )
            .unwrap();

        let store = Arc::new(SqliteModerationStore::new("sqlite::memory:").await.unwrap());
        let parent = store.insert_record(&book, None, Map::new()).await.unwrap().object;
        let child = store
            .insert_record(&ebook, Some(parent.id), Map::new())
            .await
            .unwrap()
            .object;
        store
            .save_entries(&[
                MonitorEntry::pending(child.clone(), None),
                MonitorEntry::pending(parent.clone(), None),
            ])
            .await
            .unwrap();
        reject_approvals(&store, &book).await;
        let engine = TransitionEngine::new(Arc::new(builder.build().unwrap()), Arc::clone(&store));

        let err = engine.approve(&child, None).await.unwrap_err();

        match err {
            MonitorError::CascadeFailure {
                link,
                depth,
                rolled_back,
                ..
            } => {
                assert_eq!(link, parent);
                assert_eq!(depth, 1);
                assert!(rolled_back);
            }
            other => panic!("expected cascade failure, got {other:?}"),
        }
        // The ebook's entry was written first, then rolled back with the batch
        let entry = store.get_entry(&child).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(store.get_entry(&parent).await.unwrap().unwrap().status, Status::Pending);
    }
}
