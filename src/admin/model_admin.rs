// Per-type admin hooks for moderated records.
//
// A `ModelAdmin` is what a moderation screen talks to: it builds the
// changelist query from request parameters, decides which bulk actions an
// actor sees, and guards edits and deletions.

use crate::admin::request_params::RequestParams;
use crate::core::moderation::{
    permission_name, Actor, BulkAction, BulkReport, EntityType, Moderatable, Moderated,
    ModerationService, ModerationStore, MonitorError, ObjectId, ObjectRef, PermissionVerb, Query,
    Record, Status,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Query parameter carrying the status filter.
pub const STATUS_PARAM: &str = "status";

/// A bulk action offered to an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAction {
    pub action: BulkAction,
    pub name: &'static str,
    pub label: &'static str,
}

/// One entry of the status list filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChoice {
    pub label: &'static str,
    /// Value of the `status` parameter; `None` clears the filter.
    pub code: Option<&'static str>,
    pub selected: bool,
}

pub struct ModelAdmin<S: ModerationStore> {
    entity_type: EntityType,
    service: Arc<ModerationService<S>>,
    list_display: Vec<String>,
    readonly_fields: Vec<String>,
    /// Become read-only once the instance is approved.
    protected_fields: Vec<String>,
}

impl<S: ModerationStore> ModelAdmin<S> {
    /// Default columns: the key, the type's own fields, then the fields it
    /// inherits from its cascade parents.
    pub fn new(service: Arc<ModerationService<S>>, entity_type: EntityType) -> Self {
        let list_display = match service.registry().cascade_chain(&entity_type) {
            Ok(chain) => chain
                .first()
                .and_then(|config| config.schema.primary_key.clone())
                .into_iter()
                .chain(chain.iter().flat_map(|config| config.schema.fields.iter().cloned()))
                .collect(),
            Err(_) => vec!["id".to_string()],
        };

        Self {
            entity_type,
            service,
            list_display,
            readonly_fields: Vec::new(),
            protected_fields: Vec::new(),
        }
    }

    pub fn with_list_display<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.list_display = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_readonly_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.readonly_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_protected_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.protected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn is_monitored(&self) -> bool {
        self.service.registry().is_moderated(&self.entity_type)
    }

    // ------------------------------------------------------------------------
    // Changelist
    // ------------------------------------------------------------------------

    /// Columns of the changelist, the status column last.
    pub fn list_display(&self) -> Vec<String> {
        let mut columns = self.list_display.clone();
        if let Some(config) = self.service.registry().lookup(&self.entity_type) {
            columns.push(config.status_field_name.clone());
        }
        columns
    }

    /// Display values for one changelist row, in `list_display()` order.
    pub fn list_row(&self, object: &Moderated<Record>) -> Vec<String> {
        let config = object.moderation().config();
        self.list_display()
            .iter()
            .map(|column| {
                if *column == config.status_field_name {
                    object.status_display().to_string()
                } else if config.schema.primary_key.as_deref() == Some(column.as_str()) {
                    object.id().to_string()
                } else {
                    match object.get(column) {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => "-".to_string(),
                        Some(other) => other.to_string(),
                    }
                }
            })
            .collect()
    }

    pub fn status_filter_choices(&self, params: &RequestParams) -> Vec<FilterChoice> {
        let selected = params.get(STATUS_PARAM).and_then(|raw| raw.parse::<Status>().ok());
        let mut choices = vec![FilterChoice {
            label: "All",
            code: None,
            selected: selected.is_none(),
        }];
        choices.extend(Status::ALL.into_iter().map(|status| FilterChoice {
            label: status.label(),
            code: Some(status.code()),
            selected: selected == Some(status),
        }));
        choices
    }

    /// The changelist query.
    ///
    /// The `status` parameter (a name such as `pending` or a code such as
    /// `IP`) is consumed here so that later parameter handling never sees it.
    /// Unrecognised values leave the list unfiltered.
    pub fn queryset(&self, params: &mut RequestParams) -> Result<Query, MonitorError> {
        let status = params.take(STATUS_PARAM);
        let query = self.service.all_objects(&self.entity_type)?;
        Ok(match status.and_then(|raw| raw.parse::<Status>().ok()) {
            Some(status) => query.with_status(status),
            None => query,
        })
    }

    /// Run the changelist: the status filter plus one equality filter per
    /// remaining parameter, each of which must name a field of the type or
    /// one it inherits.
    pub async fn changelist(
        &self,
        params: &mut RequestParams,
    ) -> Result<Vec<Moderated<Record>>, MonitorError> {
        let mut query = self.queryset(params)?;

        for (field, raw) in params.iter() {
            let value = serde_json::from_str::<Value>(raw)
                .unwrap_or_else(|_| Value::String(raw.to_string()));
            query = self.service.filter_field(query, field, value).await?;
        }

        self.service.fetch(&query).await
    }

    // ------------------------------------------------------------------------
    // Actions and permissions
    // ------------------------------------------------------------------------

    pub fn has_moderate_permission(&self, actor: &dyn Actor) -> bool {
        self.service.has_moderate_permission(actor, &self.entity_type)
    }

    /// Bulk actions `actor` may run on this type.
    pub fn actions(&self, actor: &dyn Actor) -> Vec<AdminAction> {
        let Some(config) = self.service.registry().lookup(&self.entity_type) else {
            return Vec::new();
        };
        BulkAction::ALL
            .into_iter()
            .filter(|action| actor.has_permission(&config.permission(action.required_verb())))
            .map(|action| AdminAction {
                action,
                name: action.name(),
                label: action.label(),
            })
            .collect()
    }

    /// Run a named action. Actions the actor is not offered are refused.
    pub async fn run_action(
        &self,
        actor: &dyn Actor,
        name: &str,
        ids: &[ObjectId],
    ) -> Result<BulkReport, MonitorError> {
        self.service.registry().require(&self.entity_type)?;

        let action = match name.parse::<BulkAction>() {
            Ok(action) => action,
            Err(_) => return Err(MonitorError::permission_denied(actor.username(), name)),
        };
        if !self.actions(actor).iter().any(|a| a.action == action) {
            return Err(MonitorError::permission_denied(
                actor.username(),
                permission_name(action.required_verb(), &self.entity_type),
            ));
        }

        self.service
            .run_bulk_action(actor, &self.entity_type, action, ids)
            .await
    }

    pub fn readonly_fields(&self, object: Option<&Moderated<Record>>) -> Vec<String> {
        let approved = object.map(|o| o.is_approved()).unwrap_or(false);
        if self.is_monitored() && approved {
            self.readonly_fields
                .iter()
                .chain(self.protected_fields.iter())
                .cloned()
                .collect()
        } else {
            self.readonly_fields.clone()
        }
    }

    pub fn has_delete_permission(&self, actor: &dyn Actor, object: Option<&Moderated<Record>>) -> bool {
        if self.is_monitored() {
            self.service
                .can_delete(actor, &self.entity_type, object.map(|o| o.status()))
        } else {
            actor.has_permission(&permission_name(PermissionVerb::Delete, &self.entity_type))
        }
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    pub async fn add(
        &self,
        actor: &dyn Actor,
        fields: Map<String, Value>,
    ) -> Result<Moderated<Record>, MonitorError> {
        self.service.create(actor, &self.entity_type, fields).await
    }

    /// Save an edit. Changing the value of a read-only field is refused.
    pub async fn save_change(
        &self,
        actor: &dyn Actor,
        id: ObjectId,
        changes: Map<String, Value>,
    ) -> Result<Moderated<Record>, MonitorError> {
        let object = ObjectRef::new(self.entity_type.clone(), id);
        let current = self
            .service
            .get(&object)
            .await?
            .ok_or_else(|| MonitorError::NotFound(object.clone()))?;

        let readonly = self.readonly_fields(Some(&current));
        if let Some(field) = changes
            .iter()
            .find(|(field, value)| readonly.contains(field) && current.get(field) != Some(value))
            .map(|(field, _)| field.clone())
        {
            return Err(MonitorError::ReadOnlyField { object, field });
        }

        self.service.update(actor, &object, changes).await
    }

    pub async fn delete(&self, actor: &dyn Actor, id: ObjectId) -> Result<(), MonitorError> {
        let object = ObjectRef::new(self.entity_type.clone(), id);
        self.service.delete(actor, &object).await
    }
}
