// Permission naming and the actor abstraction.
//
// The host application owns authentication. All the moderation layer needs is
// "does this actor hold permission X", with names built by `permission_name`.

use super::moderation_models::EntityType;
use std::collections::HashSet;
use std::fmt;

/// Verbs a permission can be granted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionVerb {
    Add,
    Change,
    Delete,
    Moderate,
}

impl PermissionVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionVerb::Add => "add",
            PermissionVerb::Change => "change",
            PermissionVerb::Delete => "delete",
            PermissionVerb::Moderate => "moderate",
        }
    }
}

impl fmt::Display for PermissionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the permission name for `verb` on `entity_type`.
///
/// Format: `<app_label>.<verb>_<model>`, e.g. `testapp.moderate_book`.
pub fn permission_name(verb: PermissionVerb, entity_type: &EntityType) -> String {
    format!(
        "{}.{}_{}",
        entity_type.app_label(),
        verb.as_str(),
        entity_type.model()
    )
}

/// Whoever is acting on the moderation layer.
pub trait Actor: Send + Sync {
    fn username(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;

    fn can(&self, verb: PermissionVerb, entity_type: &EntityType) -> bool {
        self.has_permission(&permission_name(verb, entity_type))
    }
}

/// An actor with a fixed permission set.
#[derive(Debug, Clone, Default)]
pub struct StaticActor {
    username: String,
    permissions: HashSet<String>,
    superuser: bool,
}

impl StaticActor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// An actor holding every permission.
    pub fn superuser(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            permissions: HashSet::new(),
            superuser: true,
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn grant(self, verb: PermissionVerb, entity_type: &EntityType) -> Self {
        self.with_permission(permission_name(verb, entity_type))
    }
}

impl Actor for StaticActor {
    fn username(&self) -> &str {
        &self.username
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.superuser || self.permissions.contains(permission)
    }
}
