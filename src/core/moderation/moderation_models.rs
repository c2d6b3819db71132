// Moderation domain models - identities, statuses and monitor entries.
//
// These are pure domain types with no storage or admin dependencies.
// The infra layer persists them, the admin layer renders them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Primary key of a persisted record.
pub type ObjectId = i64;

// ============================================================================
// ENTITY IDENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdentityError {
    #[error("Entity type must look like 'app_label.model', got '{0}'")]
    InvalidEntityType(String),

    #[error("Unknown moderation status '{0}'")]
    UnknownStatus(String),
}

/// Identity of a host type, written `<app_label>.<model>`.
///
/// Both halves are lower-cased on construction so that `testapp.Book` and
/// `testapp.book` name the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType {
    app_label: String,
    model: String,
}

impl EntityType {
    pub fn new(app_label: impl AsRef<str>, model: impl AsRef<str>) -> Self {
        Self {
            app_label: app_label.as_ref().trim().to_lowercase(),
            model: model.as_ref().trim().to_lowercase(),
        }
    }

    pub fn app_label(&self) -> &str {
        &self.app_label
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model)
    }
}

impl FromStr for EntityType {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((app, model))
                if !app.trim().is_empty() && !model.trim().is_empty() && !model.contains('.') =>
            {
                Ok(Self::new(app, model))
            }
            _ => Err(ParseIdentityError::InvalidEntityType(s.to_string())),
        }
    }
}

impl TryFrom<String> for EntityType {
    type Error = ParseIdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.to_string()
    }
}

/// A single record of a given type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub entity_type: EntityType,
    pub id: ObjectId,
}

impl ObjectRef {
    pub fn new(entity_type: EntityType, id: ObjectId) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// The three moderation states.
///
/// Transitions (self arcs are no-ops):
/// - approve: pending, challenged, approved -> approved
/// - challenge: pending, approved -> challenged
/// - reset: challenged, approved -> pending
///
/// There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Challenged,
    Approved,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::Challenged, Status::Approved];

    /// Two-letter code used in storage.
    pub fn code(self) -> &'static str {
        match self {
            Status::Pending => "IP",
            Status::Challenged => "CH",
            Status::Approved => "AP",
        }
    }

    pub fn from_code(code: &str) -> Option<Status> {
        Status::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Name used in request parameters and serialized output.
    pub fn name(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Challenged => "challenged",
            Status::Approved => "approved",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Status::Pending => "In Pending",
            Status::Challenged => "Challenged",
            Status::Approved => "Approved",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Status {
    type Err = ParseIdentityError;

    /// Accepts either the name (`approved`) or the storage code (`AP`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Status::ALL
            .into_iter()
            .find(|status| {
                status.name().eq_ignore_ascii_case(trimmed)
                    || status.code().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| ParseIdentityError::UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// MONITOR ENTRY
// ============================================================================

/// The backing record holding an instance's moderation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub target: ObjectRef,
    pub status: Status,
    /// Username of whoever made the last transition, if anyone.
    pub status_by: Option<String>,
    pub status_date: DateTime<Utc>,
    pub notes: String,
}

impl MonitorEntry {
    /// A fresh entry in `Pending`.
    pub fn pending(target: ObjectRef, status_by: Option<String>) -> Self {
        Self {
            target,
            status: Status::Pending,
            status_by,
            status_date: Utc::now(),
            notes: String::new(),
        }
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A persisted host record as seen through the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub object: ObjectRef,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(object: ObjectRef, fields: Map<String, Value>) -> Self {
        Self { object, fields }
    }

    pub fn id(&self) -> ObjectId {
        self.object.id
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.object.entity_type
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Deserialize the record into a host struct. The key is exposed as `id`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut fields = self.fields.clone();
        fields
            .entry("id".to_string())
            .or_insert_with(|| Value::from(self.object.id));
        serde_json::from_value(Value::Object(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_type_is_case_insensitive() {
        let parsed: EntityType = "TestApp.Book".parse().unwrap();
        assert_eq!(parsed, EntityType::new("testapp", "book"));
        assert_eq!(parsed.to_string(), "testapp.book");
    }

    #[test]
    fn test_entity_type_rejects_malformed_names() {
        assert!("book".parse::<EntityType>().is_err());
        assert!(".book".parse::<EntityType>().is_err());
        assert!("a.b.c".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_status_parses_names_and_codes() {
        assert_eq!("pending".parse::<Status>().unwrap(), Status::Pending);
        assert_eq!("CH".parse::<Status>().unwrap(), Status::Challenged);
        assert_eq!("Approved".parse::<Status>().unwrap(), Status::Approved);
        assert!("rejected".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in Status::ALL {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code("XX"), None);
    }

    #[test]
    fn test_record_decodes_into_host_struct() {
        #[derive(serde::Deserialize)]
        struct Author {
            id: i64,
            name: String,
        }

        let mut fields = Map::new();
        fields.insert("name".into(), json!("Adrian"));
        let record = Record::new(ObjectRef::new(EntityType::new("testapp", "author"), 4), fields);

        let author: Author = record.decode().unwrap();
        assert_eq!(author.id, 4);
        assert_eq!(author.name, "Adrian");
    }
}
