// Moderation service - save paths, read paths and bulk actions.
//
// This service handles:
// - Creating and updating records with auto-approval for moderators
// - The approved-only default accessor and explicit status queries
// - Bulk approve / challenge / reset with per-item failure reporting
// - Deletion guarded by the approved-instance policy
//
// NO admin or storage specifics here - just domain logic over the store port.

use super::authorization::{delete_allowed, BulkAction, BulkReport};
use super::moderated::{Moderatable, Moderated, Moderation};
use super::moderation_errors::MonitorError;
use super::moderation_models::{EntityType, MonitorEntry, ObjectId, ObjectRef, Record, Status};
use super::moderation_store::ModerationStore;
use super::permissions::{Actor, PermissionVerb};
use super::query::Query;
use super::registry::{ModeratedTypeConfig, ModerationRegistry};
use super::transition_engine::{ModerationListener, TransitionEngine};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ModerationService<S: ModerationStore> {
    registry: Arc<ModerationRegistry>,
    store: Arc<S>,
    engine: TransitionEngine<S>,
}

impl<S: ModerationStore> ModerationService<S> {
    pub fn new(registry: Arc<ModerationRegistry>, store: Arc<S>) -> Self {
        let engine = TransitionEngine::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            registry,
            store,
            engine,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ModerationListener>) -> Self {
        self.engine = self.engine.with_listener(listener);
        self
    }

    pub fn registry(&self) -> &Arc<ModerationRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &TransitionEngine<S> {
        &self.engine
    }

    fn require_permission(
        actor: &dyn Actor,
        config: &ModeratedTypeConfig,
        verb: PermissionVerb,
    ) -> Result<(), MonitorError> {
        let permission = config.permission(verb);
        if actor.has_permission(&permission) {
            Ok(())
        } else {
            Err(MonitorError::permission_denied(actor.username(), permission))
        }
    }

    pub fn has_moderate_permission(&self, actor: &dyn Actor, entity_type: &EntityType) -> bool {
        self.registry
            .lookup(entity_type)
            .map(|config| actor.has_permission(&config.moderate_permission()))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Save paths
    // ------------------------------------------------------------------------

    /// Create a record on behalf of `actor`.
    ///
    /// The record starts pending and is approved straight away when the actor
    /// holds the moderate permission for the type.
    pub async fn create(
        &self,
        actor: &dyn Actor,
        entity_type: &EntityType,
        fields: Map<String, Value>,
    ) -> Result<Moderated<Record>, MonitorError> {
        let config = self.registry.require(entity_type)?;
        Self::require_permission(actor, &config, PermissionVerb::Add)?;

        let object = self.insert_chain(entity_type, fields, Some(actor)).await?;

        if actor.has_permission(&config.moderate_permission()) {
            self.engine.approve(&object, Some(actor)).await?;
        }
        self.engine.load(&object).await
    }

    /// Create a record outside any request (fixtures, shell, imports).
    /// It always starts pending.
    pub async fn create_unattended(
        &self,
        entity_type: &EntityType,
        fields: Map<String, Value>,
    ) -> Result<Moderated<Record>, MonitorError> {
        let object = self.insert_chain(entity_type, fields, None).await?;
        self.engine.load(&object).await
    }

    /// Apply field changes on behalf of `actor`.
    ///
    /// Status never regresses here: only a moderator's edit changes it,
    /// and then only to approved.
    pub async fn update(
        &self,
        actor: &dyn Actor,
        object: &ObjectRef,
        changes: Map<String, Value>,
    ) -> Result<Moderated<Record>, MonitorError> {
        let config = self.registry.require(&object.entity_type)?;
        Self::require_permission(actor, &config, PermissionVerb::Change)?;

        let chain = self.registry.cascade_chain(&object.entity_type)?;
        let parts = Self::partition_fields(&chain, changes)?;

        for (config, part) in chain.iter().zip(parts) {
            if part.is_empty() {
                continue;
            }
            let link = ObjectRef::new(config.entity_type().clone(), object.id);
            let mut record = self
                .store
                .get_record(&link)
                .await?
                .ok_or_else(|| MonitorError::NotFound(link.clone()))?;
            record.fields.extend(part);
            self.store.update_record(&record).await?;
        }

        if actor.has_permission(&config.moderate_permission()) {
            self.engine.approve(object, Some(actor)).await?;
        }
        self.engine.load(object).await
    }

    /// Insert the record and its cascade parents, root first, all sharing the
    /// root's key, then write a pending entry for every link.
    ///
    /// Nothing stays behind when a step fails.
    async fn insert_chain(
        &self,
        entity_type: &EntityType,
        fields: Map<String, Value>,
        actor: Option<&dyn Actor>,
    ) -> Result<ObjectRef, MonitorError> {
        let chain = self.registry.cascade_chain(entity_type)?;
        let parts = Self::partition_fields(&chain, fields)?;
        let status_by = actor.map(|a| a.username().to_string());

        let mut created = Vec::with_capacity(chain.len());
        if let Err(err) = self
            .write_chain(&chain, parts, status_by.clone(), &mut created)
            .await
        {
            self.discard(entity_type, &created).await;
            return Err(err);
        }

        let object = created
            .pop()
            .ok_or_else(|| MonitorError::NotModerated(entity_type.clone()))?;
        tracing::info!(
            object = %object,
            by = status_by.as_deref().unwrap_or("-"),
            "Created moderated record"
        );
        Ok(object)
    }

    async fn write_chain(
        &self,
        chain: &[Arc<ModeratedTypeConfig>],
        parts: Vec<Map<String, Value>>,
        status_by: Option<String>,
        created: &mut Vec<ObjectRef>,
    ) -> Result<(), MonitorError> {
        let mut id: Option<ObjectId> = None;
        for (config, part) in chain.iter().zip(parts).rev() {
            let record = self
                .store
                .insert_record(config.entity_type(), id, part)
                .await?;
            id = Some(record.id());
            created.push(record.object);
        }

        let entries: Vec<MonitorEntry> = created
            .iter()
            .map(|object| MonitorEntry::pending(object.clone(), status_by.clone()))
            .collect();
        self.store
            .save_entries(&entries)
            .await
            .map_err(|e| MonitorError::Store(e.source))
    }

    // Removes records a failed insert_chain already wrote.
    async fn discard(&self, entity_type: &EntityType, created: &[ObjectRef]) {
        if created.is_empty() {
            return;
        }
        match self.store.delete_records(created).await {
            Ok(removed) => {
                tracing::warn!(entity_type = %entity_type, removed, "Discarded partially created record chain");
            }
            Err(err) => {
                tracing::error!(
                    entity_type = %entity_type,
                    records = created.len(),
                    "Failed to discard partially created record chain: {}",
                    err
                );
            }
        }
    }

    /// Split fields over the chain: each goes to the nearest type declaring it.
    fn partition_fields(
        chain: &[Arc<ModeratedTypeConfig>],
        fields: Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>, MonitorError> {
        let mut parts = vec![Map::new(); chain.len()];
        for (field, value) in fields {
            let owner = chain
                .iter()
                .position(|config| config.schema.has_field(&field))
                .ok_or_else(|| MonitorError::UnknownField {
                    entity_type: chain[0].entity_type().clone(),
                    field: field.clone(),
                })?;
            if chain[owner].schema.primary_key.as_deref() == Some(field.as_str()) {
                // Keys are assigned by the store
                continue;
            }
            parts[owner].insert(field, value);
        }
        Ok(parts)
    }

    // ------------------------------------------------------------------------
    // Read paths
    // ------------------------------------------------------------------------

    /// The default accessor: approved instances only.
    pub fn objects(&self, entity_type: &EntityType) -> Result<Query, MonitorError> {
        self.registry.require(entity_type)?;
        Ok(Query::approved_only(entity_type.clone()))
    }

    /// Every instance whatever its status. Meant for moderation screens.
    pub fn all_objects(&self, entity_type: &EntityType) -> Result<Query, MonitorError> {
        self.registry.require(entity_type)?;
        Ok(Query::all(entity_type.clone()))
    }

    pub async fn get(&self, object: &ObjectRef) -> Result<Option<Moderated<Record>>, MonitorError> {
        match self.engine.load(object).await {
            Ok(found) => Ok(Some(found)),
            Err(MonitorError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Run a query. Subtype records carry their inherited fields.
    pub async fn fetch(&self, query: &Query) -> Result<Vec<Moderated<Record>>, MonitorError> {
        let config = self.registry.require(&query.entity_type)?;
        let found = self.store.find(query).await?;

        let mut objects = Vec::with_capacity(found.len());
        for stored in found {
            let entry = stored.entry_or_pending();
            let record = self.engine.inherit_fields(stored.record).await?;
            objects.push(Moderated::new(record, Moderation::new(entry, Arc::clone(&config))));
        }
        Ok(objects)
    }

    /// Narrow `query` to records whose `field` equals `value`.
    ///
    /// A field inherited from a cascade parent is matched against the
    /// parent's records and becomes a key restriction. A primary key anywhere
    /// in the chain filters on the shared key.
    pub async fn filter_field(
        &self,
        query: Query,
        field: &str,
        value: Value,
    ) -> Result<Query, MonitorError> {
        let owner = self
            .registry
            .field_owner(&query.entity_type, field)?
            .ok_or_else(|| MonitorError::UnknownField {
                entity_type: query.entity_type.clone(),
                field: field.to_string(),
            })?;

        if owner.schema.primary_key.as_deref() == Some(field) {
            return Ok(query.filter("id", value));
        }
        if owner.entity_type() == &query.entity_type {
            return Ok(query.filter(field, value));
        }

        let inherited = Query::all(owner.entity_type().clone()).filter(field, value);
        let ids: Vec<ObjectId> = self
            .store
            .find(&inherited)
            .await?
            .into_iter()
            .map(|stored| stored.record.id())
            .collect();
        Ok(query.ids(ids))
    }

    pub async fn count(&self, query: &Query) -> Result<usize, MonitorError> {
        self.registry.require(&query.entity_type)?;
        Ok(self.store.count(query).await?)
    }

    // ------------------------------------------------------------------------
    // Bulk actions
    // ------------------------------------------------------------------------

    /// Run `action` over the selected ids.
    ///
    /// The permission check happens once, before anything is attempted.
    /// Individual failures are collected in the report and do not stop the batch.
    pub async fn run_bulk_action(
        &self,
        actor: &dyn Actor,
        entity_type: &EntityType,
        action: BulkAction,
        ids: &[ObjectId],
    ) -> Result<BulkReport, MonitorError> {
        let config = self.registry.require(entity_type)?;
        Self::require_permission(actor, &config, action.required_verb())?;

        let mut report = BulkReport::new(action);
        for &id in ids {
            let object = ObjectRef::new(entity_type.clone(), id);
            match self
                .engine
                .transition(&object, action.target_status(), Some(actor), None)
                .await
            {
                Ok(_) => report.record_success(id),
                Err(err) => {
                    tracing::warn!(object = %object, action = %action, "Bulk action item failed: {}", err);
                    report.record_failure(id, &err);
                }
            }
        }

        tracing::info!(
            entity_type = %entity_type,
            action = %action,
            by = actor.username(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk action finished"
        );
        Ok(report)
    }

    pub async fn approve_selected(
        &self,
        actor: &dyn Actor,
        entity_type: &EntityType,
        ids: &[ObjectId],
    ) -> Result<BulkReport, MonitorError> {
        self.run_bulk_action(actor, entity_type, BulkAction::ApproveSelected, ids)
            .await
    }

    pub async fn challenge_selected(
        &self,
        actor: &dyn Actor,
        entity_type: &EntityType,
        ids: &[ObjectId],
    ) -> Result<BulkReport, MonitorError> {
        self.run_bulk_action(actor, entity_type, BulkAction::ChallengeSelected, ids)
            .await
    }

    /// Needs only the change permission, unlike approve and challenge.
    pub async fn reset_to_pending(
        &self,
        actor: &dyn Actor,
        entity_type: &EntityType,
        ids: &[ObjectId],
    ) -> Result<BulkReport, MonitorError> {
        self.run_bulk_action(actor, entity_type, BulkAction::ResetToPending, ids)
            .await
    }

    // ------------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------------

    pub fn can_delete(&self, actor: &dyn Actor, entity_type: &EntityType, status: Option<Status>) -> bool {
        match self.registry.lookup(entity_type) {
            Some(config) => delete_allowed(&config, actor, status),
            None => false,
        }
    }

    fn require_delete(
        config: &ModeratedTypeConfig,
        actor: &dyn Actor,
        status: Status,
    ) -> Result<(), MonitorError> {
        if delete_allowed(config, actor, Some(status)) {
            Ok(())
        } else {
            Err(MonitorError::permission_denied(
                actor.username(),
                config.permission(PermissionVerb::Delete),
            ))
        }
    }

    /// Delete a record together with its cascade parents and the subtype
    /// records sharing its key. Each subtype record must pass its own
    /// delete policy, otherwise nothing is removed.
    pub async fn delete(&self, actor: &dyn Actor, object: &ObjectRef) -> Result<(), MonitorError> {
        let config = self.registry.require(&object.entity_type)?;
        let current = self.engine.load(object).await?;
        Self::require_delete(&config, actor, current.status())?;

        let mut links = Vec::new();
        for subtype in self.registry.subtypes(&object.entity_type) {
            let query = Query::all(subtype.clone()).ids([object.id]);
            if let Some(stored) = self.store.find(&query).await?.into_iter().next() {
                let subtype_config = self.registry.require(&subtype)?;
                Self::require_delete(&subtype_config, actor, stored.status())?;
                links.push(stored.record.object);
            }
        }
        links.extend(
            self.registry
                .cascade_chain(&object.entity_type)?
                .iter()
                .map(|c| ObjectRef::new(c.entity_type().clone(), object.id)),
        );
        let removed = self.store.delete_records(&links).await?;

        tracing::info!(object = %object, by = actor.username(), removed, "Deleted moderated record");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
