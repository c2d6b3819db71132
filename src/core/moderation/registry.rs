// The moderation queue registry.
//
// Every moderated type is registered once while the application boots.
// `RegistryBuilder` collects registrations and validates them; `build()`
// freezes the result into an immutable `ModerationRegistry` that request
// handlers share through an `Arc`.

use super::moderation_errors::{ConfigurationError, MonitorError};
use super::moderation_models::EntityType;
use super::permissions::{permission_name, PermissionVerb};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_STATUS_FIELD: &str = "status";
pub const DEFAULT_MONITOR_FIELD: &str = "monitor_entry";

// ============================================================================
// SCHEMA (REFLECTION)
// ============================================================================

/// What the persistence collaborator knows about a host type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl EntitySchema {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            primary_key: None,
            fields: Vec::new(),
        }
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn fields<I, F>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.fields.extend(names.into_iter().map(Into::into));
        self
    }

    /// Does the type declare `name`, either as a field or as its key?
    pub fn has_field(&self, name: &str) -> bool {
        self.primary_key.as_deref() == Some(name) || self.fields.iter().any(|f| f == name)
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Instances of `entity_type` that point at the owner through `via_field`
/// are moderated together with the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedLink {
    pub entity_type: EntityType,
    pub via_field: String,
}

fn default_true() -> bool {
    true
}

fn default_status_field() -> String {
    DEFAULT_STATUS_FIELD.to_string()
}

fn default_monitor_field() -> String {
    DEFAULT_MONITOR_FIELD.to_string()
}

/// Options supplied when a type is put under moderation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub cascade_parent: Option<EntityType>,
    #[serde(default)]
    pub related: Vec<RelatedLink>,
    #[serde(default = "default_true")]
    pub can_delete_approved: bool,
    #[serde(default = "default_status_field")]
    pub status_field_name: String,
    #[serde(default = "default_monitor_field")]
    pub monitor_field_name: String,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            cascade_parent: None,
            related: Vec::new(),
            can_delete_approved: true,
            status_field_name: default_status_field(),
            monitor_field_name: default_monitor_field(),
        }
    }
}

impl Registration {
    pub fn cascade_to(mut self, parent: EntityType) -> Self {
        self.cascade_parent = Some(parent);
        self
    }

    pub fn related(mut self, entity_type: EntityType, via_field: impl Into<String>) -> Self {
        self.related.push(RelatedLink {
            entity_type,
            via_field: via_field.into(),
        });
        self
    }

    pub fn can_delete_approved(mut self, allowed: bool) -> Self {
        self.can_delete_approved = allowed;
        self
    }

    pub fn status_field_name(mut self, name: impl Into<String>) -> Self {
        self.status_field_name = name.into();
        self
    }

    pub fn monitor_field_name(mut self, name: impl Into<String>) -> Self {
        self.monitor_field_name = name.into();
        self
    }
}

/// Per-type moderation policy, fixed once the registry is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratedTypeConfig {
    pub schema: EntitySchema,
    pub status_field_name: String,
    pub monitor_field_name: String,
    pub cascade_parent: Option<EntityType>,
    pub related: Vec<RelatedLink>,
    pub can_delete_approved: bool,
}

impl ModeratedTypeConfig {
    pub fn entity_type(&self) -> &EntityType {
        &self.schema.entity_type
    }

    pub fn permission(&self, verb: PermissionVerb) -> String {
        permission_name(verb, self.entity_type())
    }

    /// Distinct from the change and delete permissions.
    pub fn moderate_permission(&self) -> String {
        self.permission(PermissionVerb::Moderate)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    configs: BTreeMap<EntityType, ModeratedTypeConfig>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a type under moderation.
    ///
    /// Checks that only need this one type happen here; references to
    /// other types are checked by `build()`.
    pub fn register(
        &mut self,
        schema: EntitySchema,
        registration: Registration,
    ) -> Result<&mut Self, ConfigurationError> {
        let entity_type = schema.entity_type.clone();

        if self.configs.contains_key(&entity_type) {
            return Err(ConfigurationError::AlreadyRegistered(entity_type));
        }

        match schema.primary_key.as_deref() {
            Some(pk) if !pk.trim().is_empty() => {}
            _ => return Err(ConfigurationError::MissingPrimaryKey(entity_type)),
        }

        for name in [
            &registration.status_field_name,
            &registration.monitor_field_name,
        ] {
            if schema.has_field(name) {
                return Err(ConfigurationError::FieldCollision {
                    entity_type,
                    field: name.clone(),
                });
            }
        }
        if registration.status_field_name == registration.monitor_field_name {
            return Err(ConfigurationError::FieldCollision {
                entity_type,
                field: registration.monitor_field_name,
            });
        }

        let config = ModeratedTypeConfig {
            schema,
            status_field_name: registration.status_field_name,
            monitor_field_name: registration.monitor_field_name,
            cascade_parent: registration.cascade_parent,
            related: registration.related,
            can_delete_approved: registration.can_delete_approved,
        };

        tracing::debug!(entity_type = %entity_type, "Registered type for moderation");
        self.configs.insert(entity_type, config);
        Ok(self)
    }

    pub fn build(self) -> Result<ModerationRegistry, ConfigurationError> {
        for (entity_type, config) in &self.configs {
            // Parents must be moderated too
            if let Some(parent) = &config.cascade_parent {
                if !self.configs.contains_key(parent) {
                    return Err(ConfigurationError::UnknownCascadeParent {
                        child: entity_type.clone(),
                        parent: parent.clone(),
                    });
                }
            }

            let mut seen = HashSet::new();
            let mut cursor = Some(entity_type);
            while let Some(current) = cursor {
                if !seen.insert(current) {
                    return Err(ConfigurationError::CascadeCycle(entity_type.clone()));
                }
                cursor = self
                    .configs
                    .get(current)
                    .and_then(|c| c.cascade_parent.as_ref());
            }

            for link in &config.related {
                let related = self.configs.get(&link.entity_type).ok_or_else(|| {
                    ConfigurationError::UnknownRelated {
                        owner: entity_type.clone(),
                        related: link.entity_type.clone(),
                    }
                })?;
                if !related.schema.has_field(&link.via_field) {
                    return Err(ConfigurationError::MissingRelatedField {
                        owner: entity_type.clone(),
                        related: link.entity_type.clone(),
                        field: link.via_field.clone(),
                    });
                }
            }
        }

        let configs = self
            .configs
            .into_iter()
            .map(|(entity_type, config)| (entity_type, Arc::new(config)))
            .collect();
        Ok(ModerationRegistry { configs })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Read-only map of moderated types.
#[derive(Debug, Default)]
pub struct ModerationRegistry {
    configs: HashMap<EntityType, Arc<ModeratedTypeConfig>>,
}

impl ModerationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, entity_type: &EntityType) -> Option<Arc<ModeratedTypeConfig>> {
        self.configs.get(entity_type).cloned()
    }

    pub fn require(&self, entity_type: &EntityType) -> Result<Arc<ModeratedTypeConfig>, MonitorError> {
        self.lookup(entity_type)
            .ok_or_else(|| MonitorError::NotModerated(entity_type.clone()))
    }

    pub fn is_moderated(&self, entity_type: &EntityType) -> bool {
        self.configs.contains_key(entity_type)
    }

    /// The type's config followed by each cascade parent, nearest first.
    pub fn cascade_chain(
        &self,
        entity_type: &EntityType,
    ) -> Result<Vec<Arc<ModeratedTypeConfig>>, MonitorError> {
        let mut chain = vec![self.require(entity_type)?];
        while let Some(parent) = chain.last().and_then(|c| c.cascade_parent.clone()) {
            chain.push(self.require(&parent)?);
        }
        Ok(chain)
    }

    /// The nearest type in the cascade chain that declares `field`.
    pub fn field_owner(
        &self,
        entity_type: &EntityType,
        field: &str,
    ) -> Result<Option<Arc<ModeratedTypeConfig>>, MonitorError> {
        Ok(self
            .cascade_chain(entity_type)?
            .into_iter()
            .find(|config| config.schema.has_field(field)))
    }

    /// Types whose cascade chain passes through `entity_type`, nearest first.
    /// Their records share keys with records of `entity_type`.
    pub fn subtypes(&self, entity_type: &EntityType) -> Vec<EntityType> {
        let mut found: Vec<(usize, EntityType)> = self
            .configs
            .keys()
            .filter(|candidate| *candidate != entity_type)
            .filter_map(|candidate| {
                let chain = self.cascade_chain(candidate).ok()?;
                let distance = chain.iter().position(|c| c.entity_type() == entity_type)?;
                Some((distance, candidate.clone()))
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, entity_type)| entity_type).collect()
    }

    pub fn types(&self) -> Vec<EntityType> {
        let mut types: Vec<_> = self.configs.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> EntityType {
        EntityType::new("testapp", "book")
    }

    fn ebook() -> EntityType {
        EntityType::new("testapp", "ebook")
    }

    fn book_schema() -> EntitySchema {
        EntitySchema::new(book())
            .primary_key("id")
            .fields(["name", "isbn", "pages"])
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(book_schema(), Registration::default()).unwrap();

        let err = builder
            .register(book_schema(), Registration::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::AlreadyRegistered(t) if t == book()));
    }

    #[test]
    fn test_type_without_primary_key_is_rejected() {
        let mut builder = RegistryBuilder::new();
        let err = builder
            .register(EntitySchema::new(book()).field("name"), Registration::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingPrimaryKey(_)));
    }

    #[test]
    fn test_status_field_must_not_shadow_host_field() {
        let mut builder = RegistryBuilder::new();
        let schema = book_schema().field("status");
        let err = builder.register(schema, Registration::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::FieldCollision { field, .. } if field == "status"));

        // Renaming the injected attribute avoids the clash
        let schema = book_schema().field("status");
        builder
            .register(schema, Registration::default().status_field_name("mod_status"))
            .unwrap();
    }

    #[test]
    fn test_cascade_parent_must_be_registered() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                EntitySchema::new(ebook()).primary_key("book_ptr"),
                Registration::default().cascade_to(book()),
            )
            .unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownCascadeParent { .. }));
    }

    #[test]
    fn test_cascade_cycles_are_rejected() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(book_schema(), Registration::default().cascade_to(ebook()))
            .unwrap();
        builder
            .register(
                EntitySchema::new(ebook()).primary_key("book_ptr"),
                Registration::default().cascade_to(book()),
            )
            .unwrap();

        assert!(matches!(
            builder.build().unwrap_err(),
            ConfigurationError::CascadeCycle(_)
        ));
    }

    #[test]
    fn test_related_type_needs_linking_field() {
        let supplement = EntityType::new("testapp", "supplement");
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                book_schema(),
                Registration::default().related(supplement.clone(), "book"),
            )
            .unwrap();
        builder
            .register(
                EntitySchema::new(supplement).primary_key("id").field("serial_num"),
                Registration::default(),
            )
            .unwrap();

        assert!(matches!(
            builder.build().unwrap_err(),
            ConfigurationError::MissingRelatedField { field, .. } if field == "book"
        ));
    }

    #[test]
    fn test_cascade_chain_walks_up_to_the_root() {
        let mut builder = RegistryBuilder::new();
        builder.register(book_schema(), Registration::default()).unwrap();
        builder
            .register(
                EntitySchema::new(ebook()).primary_key("book_ptr").field("file_size"),
                Registration::default().cascade_to(book()),
            )
            .unwrap();
        let registry = builder.build().unwrap();

        let chain: Vec<_> = registry
            .cascade_chain(&ebook())
            .unwrap()
            .iter()
            .map(|c| c.entity_type().clone())
            .collect();
        assert_eq!(chain, vec![ebook(), book()]);
        assert_eq!(registry.types(), vec![book(), ebook()]);
    }

    #[test]
    fn test_subtypes_and_field_owners_follow_the_chain() {
        let audiobook = EntityType::new("testapp", "audiobook");
        let mut builder = RegistryBuilder::new();
        builder.register(book_schema(), Registration::default()).unwrap();
        builder
            .register(
                EntitySchema::new(ebook()).primary_key("book_ptr").field("file_size"),
                Registration::default().cascade_to(book()),
            )
            .unwrap();
        builder
            .register(
                EntitySchema::new(audiobook.clone())
                    .primary_key("ebook_ptr")
                    .field("narrator"),
                Registration::default().cascade_to(ebook()),
            )
            .unwrap();
        let registry = builder.build().unwrap();

        assert_eq!(registry.subtypes(&book()), vec![ebook(), audiobook.clone()]);
        assert_eq!(registry.subtypes(&ebook()), vec![audiobook.clone()]);
        assert!(registry.subtypes(&audiobook).is_empty());

        let owner = |field: &str| {
            registry
                .field_owner(&audiobook, field)
                .unwrap()
                .map(|c| c.entity_type().clone())
        };
        assert_eq!(owner("narrator"), Some(audiobook.clone()));
        assert_eq!(owner("name"), Some(book()));
        assert_eq!(owner("nickname"), None);
    }

    #[test]
    fn test_lookup_of_unregistered_type_is_not_moderated() {
        let registry = RegistryBuilder::new().build().unwrap();
        let publisher = EntityType::new("testapp", "publisher");

        assert!(registry.lookup(&publisher).is_none());
        assert!(matches!(
            registry.require(&publisher),
            Err(MonitorError::NotModerated(_))
        ));
    }

    #[test]
    fn test_moderate_permission_is_derived_from_type() {
        let mut builder = RegistryBuilder::new();
        builder.register(book_schema(), Registration::default()).unwrap();
        let registry = builder.build().unwrap();

        let config = registry.lookup(&book()).unwrap();
        assert_eq!(config.moderate_permission(), "testapp.moderate_book");
        assert!(config.can_delete_approved);
        assert_eq!(config.status_field_name, "status");
        assert_eq!(config.monitor_field_name, "monitor_entry");
    }
}
