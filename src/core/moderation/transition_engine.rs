// Transition engine - the moderation state machine.
//
// This service handles:
// - Validating and applying approve / challenge / reset transitions
// - Expanding a transition to cascade parents and related instances
// - Writing the whole expansion as one unit of work
// - Notifying listeners once the change is stored
//
// Permission checks are the caller's job, except in `authorized_transition`.

use super::authorization::transition_verb;
use super::moderated::{Moderated, Moderation};
use super::moderation_errors::{ChainWriteError, MonitorError};
use super::moderation_models::{MonitorEntry, ObjectRef, Record, Status};
use super::moderation_store::{ModerationStore, StoredObject};
use super::permissions::Actor;
use super::query::Query;
use super::registry::ModerationRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

// ============================================================================
// EVENTS
// ============================================================================

/// Emitted after a status change has been stored.
#[derive(Debug, Clone)]
pub struct ModerationEvent {
    pub entry: MonitorEntry,
    pub previous: Status,
    /// The object whose transition pulled this one along, if any.
    pub cascaded_from: Option<ObjectRef>,
}

/// Observer for stored status changes.
#[async_trait]
pub trait ModerationListener: Send + Sync {
    async fn on_moderated(&self, event: &ModerationEvent);
}

/// What a transition changed.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The target's entry after the transition.
    pub entry: MonitorEntry,
    /// Entries of parents and related instances that changed with it.
    pub cascaded: Vec<MonitorEntry>,
}

impl TransitionOutcome {
    pub fn status(&self) -> Status {
        self.entry.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Target,
    CascadeParent,
    Related,
}

#[derive(Debug)]
struct PlannedLink {
    object: ObjectRef,
    depth: usize,
    current: MonitorEntry,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct TransitionEngine<S: ModerationStore> {
    registry: Arc<ModerationRegistry>,
    store: Arc<S>,
    listeners: Vec<Arc<dyn ModerationListener>>,
}

impl<S: ModerationStore> TransitionEngine<S> {
    pub fn new(registry: Arc<ModerationRegistry>, store: Arc<S>) -> Self {
        Self {
            registry,
            store,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ModerationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn registry(&self) -> &Arc<ModerationRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn approve(
        &self,
        target: &ObjectRef,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.transition(target, Status::Approved, by, None).await
    }

    pub async fn challenge(
        &self,
        target: &ObjectRef,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.transition(target, Status::Challenged, by, None).await
    }

    pub async fn reset_to_pending(
        &self,
        target: &ObjectRef,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.transition(target, Status::Pending, by, None).await
    }

    /// Generic dispatcher over the three transitions.
    pub async fn moderate(
        &self,
        target: &ObjectRef,
        status: Status,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.transition(target, status, by, None).await
    }

    /// Like `transition`, but the actor must hold the permission the target
    /// status calls for on the target's type.
    pub async fn authorized_transition(
        &self,
        actor: &dyn Actor,
        target: &ObjectRef,
        status: Status,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, MonitorError> {
        let config = self.registry.require(&target.entity_type)?;
        let permission = config.permission(transition_verb(status));
        if !actor.has_permission(&permission) {
            return Err(MonitorError::permission_denied(actor.username(), permission));
        }
        self.transition(target, status, Some(actor), notes).await
    }

    /// Move `target` to `status`, along with its cascade parents and related
    /// instances. Cascade links are not permission-checked.
    pub async fn transition(
        &self,
        target: &ObjectRef,
        status: Status,
        by: Option<&dyn Actor>,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.registry.require(&target.entity_type)?;
        let links = self.plan(target).await?;

        let now = Utc::now();
        let mut changed: Vec<(&PlannedLink, MonitorEntry)> = Vec::new();
        for link in &links {
            if link.current.status == status {
                tracing::debug!(object = %link.object, status = status.name(), "Transition is a no-op");
                continue;
            }
            changed.push((
                link,
                MonitorEntry {
                    target: link.object.clone(),
                    status,
                    status_by: by.map(|actor| actor.username().to_string()),
                    status_date: now,
                    notes: notes
                        .map(str::to_string)
                        .unwrap_or_else(|| link.current.notes.clone()),
                },
            ));
        }

        if !changed.is_empty() {
            let entries: Vec<MonitorEntry> = changed.iter().map(|(_, e)| e.clone()).collect();
            if let Err(err) = self.store.save_entries(&entries).await {
                return Err(Self::chain_failure(&changed, err));
            }

            tracing::info!(
                object = %target,
                status = status.name(),
                by = by.map(|a| a.username()).unwrap_or("-"),
                entries = changed.len(),
                "Moderation status changed"
            );
        }

        for (link, entry) in &changed {
            let event = ModerationEvent {
                entry: entry.clone(),
                previous: link.current.status,
                cascaded_from: (link.object != *target).then(|| target.clone()),
            };
            for listener in &self.listeners {
                listener.on_moderated(&event).await;
            }
        }

        let mut target_entry = None;
        let mut cascaded = Vec::new();
        for (link, entry) in changed {
            if link.object == *target {
                target_entry = Some(entry);
            } else {
                cascaded.push(entry);
            }
        }
        let entry = match target_entry {
            Some(entry) => entry,
            None => links
                .into_iter()
                .find(|l| l.object == *target)
                .map(|l| l.current)
                .ok_or_else(|| MonitorError::NotFound(target.clone()))?,
        };

        Ok(TransitionOutcome { entry, cascaded })
    }

    /// Load a record with its moderation component, whatever its status.
    /// Subtype records carry the fields of their cascade parents as well.
    pub async fn load(&self, object: &ObjectRef) -> Result<Moderated<Record>, MonitorError> {
        let config = self.registry.require(&object.entity_type)?;
        let stored = self
            .fetch_one(object)
            .await?
            .ok_or_else(|| MonitorError::NotFound(object.clone()))?;
        let entry = stored.entry_or_pending();
        let record = self.inherit_fields(stored.record).await?;
        Ok(Moderated::new(record, Moderation::new(entry, config)))
    }

    /// Fill in the fields stored on the record's cascade parents.
    /// Values on the record itself win over inherited ones.
    pub async fn inherit_fields(&self, mut record: Record) -> Result<Record, MonitorError> {
        let chain = self.registry.cascade_chain(record.entity_type())?;
        for config in chain.iter().skip(1) {
            let link = ObjectRef::new(config.entity_type().clone(), record.id());
            if let Some(parent) = self.store.get_record(&link).await? {
                for (field, value) in parent.fields {
                    record.fields.entry(field).or_insert(value);
                }
            }
        }
        Ok(record)
    }

    async fn fetch_one(&self, object: &ObjectRef) -> Result<Option<StoredObject>, MonitorError> {
        let query = Query::all(object.entity_type.clone()).ids([object.id]);
        Ok(self.store.find(&query).await?.into_iter().next())
    }

    /// Breadth-first expansion of the unit of work, target first.
    async fn plan(&self, target: &ObjectRef) -> Result<Vec<PlannedLink>, MonitorError> {
        let mut queue = VecDeque::from([(target.clone(), 0usize, LinkKind::Target)]);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        while let Some((object, depth, kind)) = queue.pop_front() {
            if !seen.insert(object.clone()) {
                continue;
            }

            let config = self.registry.require(&object.entity_type)?;
            let stored = match self.fetch_one(&object).await? {
                Some(stored) => stored,
                None if kind == LinkKind::Target => {
                    return Err(MonitorError::NotFound(object));
                }
                None => {
                    return Err(MonitorError::CascadeFailure {
                        link: object,
                        depth,
                        rolled_back: true,
                        reason: "linked record is missing".to_string(),
                    });
                }
            };

            if let Some(parent) = &config.cascade_parent {
                queue.push_back((
                    ObjectRef::new(parent.clone(), object.id),
                    depth + 1,
                    LinkKind::CascadeParent,
                ));
            }

            for related in &config.related {
                let query = Query::all(related.entity_type.clone())
                    .filter(related.via_field.clone(), object.id);
                for found in self.store.find(&query).await? {
                    queue.push_back((found.record.object, depth + 1, LinkKind::Related));
                }
            }

            links.push(PlannedLink {
                current: stored.entry_or_pending(),
                object,
                depth,
            });
        }

        Ok(links)
    }

    fn chain_failure(changed: &[(&PlannedLink, MonitorEntry)], err: ChainWriteError) -> MonitorError {
        match err.failed_index.and_then(|i| changed.get(i)) {
            Some((link, _)) if link.depth > 0 => {
                tracing::error!(
                    link = %link.object,
                    depth = link.depth,
                    rolled_back = err.rolled_back,
                    "Cascade write failed"
                );
                MonitorError::CascadeFailure {
                    link: link.object.clone(),
                    depth: link.depth,
                    rolled_back: err.rolled_back,
                    reason: err.source.to_string(),
                }
            }
            _ => MonitorError::Store(err.source),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
