// Moderation attached to host values by composition.
//
// `Moderated<T>` pairs any host value with a `Moderation` component. The
// component exposes the status predicates through the `Moderatable` trait and
// forwards status changes to the transition engine.

use super::moderation_errors::MonitorError;
use super::moderation_models::{MonitorEntry, ObjectRef, Record, Status};
use super::permissions::Actor;
use super::moderation_store::ModerationStore;
use super::registry::ModeratedTypeConfig;
use super::transition_engine::{TransitionEngine, TransitionOutcome};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

/// Read-only view of an instance's moderation state.
pub trait Moderatable {
    fn status(&self) -> Status;

    fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    fn is_challenged(&self) -> bool {
        self.status() == Status::Challenged
    }

    fn is_approved(&self) -> bool {
        self.status() == Status::Approved
    }

    fn status_display(&self) -> &'static str {
        self.status().label()
    }
}

impl Moderatable for MonitorEntry {
    fn status(&self) -> Status {
        self.status
    }
}

/// The moderation component of one instance.
#[derive(Debug, Clone)]
pub struct Moderation {
    entry: MonitorEntry,
    config: Arc<ModeratedTypeConfig>,
}

impl Moderation {
    pub fn new(entry: MonitorEntry, config: Arc<ModeratedTypeConfig>) -> Self {
        Self { entry, config }
    }

    pub fn entry(&self) -> &MonitorEntry {
        &self.entry
    }

    pub fn config(&self) -> &Arc<ModeratedTypeConfig> {
        &self.config
    }

    pub fn target(&self) -> &ObjectRef {
        &self.entry.target
    }

    pub fn status_by(&self) -> Option<&str> {
        self.entry.status_by.as_deref()
    }

    pub fn status_date(&self) -> DateTime<Utc> {
        self.entry.status_date
    }

    pub fn notes(&self) -> &str {
        &self.entry.notes
    }

    fn refresh(&mut self, entry: MonitorEntry) {
        self.entry = entry;
    }
}

impl Moderatable for Moderation {
    fn status(&self) -> Status {
        self.entry.status
    }
}

/// A host value under moderation.
#[derive(Debug, Clone)]
pub struct Moderated<T> {
    inner: T,
    moderation: Moderation,
}

impl<T> Moderated<T> {
    pub fn new(inner: T, moderation: Moderation) -> Self {
        Self { inner, moderation }
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    /// Swap the host value while keeping the moderation component.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Moderated<U> {
        Moderated {
            inner: f(self.inner),
            moderation: self.moderation,
        }
    }

    pub async fn approve<S: ModerationStore>(
        &mut self,
        engine: &TransitionEngine<S>,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.moderate(engine, Status::Approved, by).await
    }

    pub async fn challenge<S: ModerationStore>(
        &mut self,
        engine: &TransitionEngine<S>,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.moderate(engine, Status::Challenged, by).await
    }

    pub async fn reset_to_pending<S: ModerationStore>(
        &mut self,
        engine: &TransitionEngine<S>,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        self.moderate(engine, Status::Pending, by).await
    }

    /// Move to `status` and refresh the predicates from the stored result.
    pub async fn moderate<S: ModerationStore>(
        &mut self,
        engine: &TransitionEngine<S>,
        status: Status,
        by: Option<&dyn Actor>,
    ) -> Result<TransitionOutcome, MonitorError> {
        let target = self.moderation.target().clone();
        let outcome = engine.transition(&target, status, by, None).await?;
        self.moderation.refresh(outcome.entry.clone());
        Ok(outcome)
    }
}

impl<T> Moderatable for Moderated<T> {
    fn status(&self) -> Status {
        self.moderation.status()
    }
}

impl<T> Deref for Moderated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl Moderated<Record> {
    /// The record's fields plus the injected status attribute and entry.
    pub fn to_json(&self) -> Value {
        let config = self.moderation.config();
        let entry = self.moderation.entry();

        let mut fields = self.inner.fields.clone();
        if let Some(pk) = &config.schema.primary_key {
            fields.insert(pk.clone(), Value::from(self.inner.id()));
        }
        fields.insert(
            config.status_field_name.clone(),
            Value::from(entry.status.name()),
        );
        fields.insert(
            config.monitor_field_name.clone(),
            serde_json::json!({
                "status": entry.status.code(),
                "status_display": entry.status.label(),
                "status_by": entry.status_by,
                "status_date": entry.status_date.to_rfc3339(),
                "notes": entry.notes,
            }),
        );
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{EntitySchema, EntityType, Registration, RegistryBuilder};
    use serde_json::{json, Map};

    fn book_config() -> Arc<ModeratedTypeConfig> {
        let book = EntityType::new("testapp", "book");
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                EntitySchema::new(book.clone()).primary_key("id").field("name"),
                Registration::default().monitor_field_name("moderation"),
            )
            .unwrap();
        builder.build().unwrap().lookup(&book).unwrap()
    }

    fn pending_book() -> Moderated<Record> {
        let config = book_config();
        let object = ObjectRef::new(config.entity_type().clone(), 7);
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Definitive"));
        Moderated::new(
            Record::new(object.clone(), fields),
            Moderation::new(MonitorEntry::pending(object, Some("adder".into())), config),
        )
    }

    #[test]
    fn test_predicates_follow_the_status() {
        let book = pending_book();
        assert!(book.is_pending());
        assert!(!book.is_approved());
        assert!(!book.is_challenged());
        assert_eq!(book.status_display(), "In Pending");
        assert_eq!(book.moderation().status_by(), Some("adder"));
    }

    #[test]
    fn test_host_value_stays_reachable_through_deref() {
        let book = pending_book();
        assert_eq!(book.get("name"), Some(&json!("Definitive")));
        assert_eq!(book.id(), 7);
    }

    #[test]
    fn test_json_view_carries_injected_attributes() {
        let view = pending_book().to_json();
        assert_eq!(view["id"], json!(7));
        assert_eq!(view["status"], json!("pending"));
        assert_eq!(view["moderation"]["status"], json!("IP"));
        assert_eq!(view["moderation"]["status_by"], json!("adder"));
    }

    #[test]
    fn test_map_keeps_moderation_state() {
        let mapped = pending_book().map(|record| record.id() * 2);
        assert_eq!(*mapped, 14);
        assert!(mapped.is_pending());
    }
}
