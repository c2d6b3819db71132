// Composable queries over moderated records.
//
// A `Query` is a plain description; stores decide how to execute it but must
// agree with `Query::matches`. Status narrowing composes with every other
// filter, ordering and limit.

use super::moderation_models::{EntityType, ObjectId, Record, Status};
use serde_json::Value;
use std::cmp::Ordering;

/// Which statuses a query lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusScope {
    Any,
    Only(Status),
}

impl StatusScope {
    pub fn admits(self, status: Status) -> bool {
        match self {
            StatusScope::Any => true,
            StatusScope::Only(wanted) => wanted == status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity_type: EntityType,
    pub scope: StatusScope,
    pub filters: Vec<FieldFilter>,
    pub ids: Option<Vec<ObjectId>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    /// Every instance, whatever its status.
    pub fn all(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            scope: StatusScope::Any,
            filters: Vec::new(),
            ids: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// The default accessor for moderated types.
    pub fn approved_only(entity_type: EntityType) -> Self {
        Self::all(entity_type).approved()
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.scope = StatusScope::Only(status);
        self
    }

    pub fn pending(self) -> Self {
        self.with_status(Status::Pending)
    }

    pub fn challenged(self) -> Self {
        self.with_status(Status::Challenged)
    }

    pub fn approved(self) -> Self {
        self.with_status(Status::Approved)
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Restrict to these keys. Chained calls intersect.
    pub fn ids(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        let incoming: Vec<ObjectId> = ids.into_iter().collect();
        self.ids = Some(match self.ids.take() {
            Some(existing) => existing
                .into_iter()
                .filter(|id| incoming.contains(id))
                .collect(),
            None => incoming,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filtering semantics every store implements.
    pub fn matches(&self, record: &Record, status: Status) -> bool {
        if record.entity_type() != &self.entity_type || !self.scope.admits(status) {
            return false;
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&record.id()) {
                return false;
            }
        }
        self.filters.iter().all(|f| {
            if f.field == "id" {
                f.value.as_i64() == Some(record.id())
            } else {
                record.get(&f.field) == Some(&f.value)
            }
        })
    }

    /// Ordering semantics every store implements. Ties fall back to the key.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for order in &self.order_by {
            let ordering = if order.field == "id" {
                a.id().cmp(&b.id())
            } else {
                compare_values(a.get(&order.field), b.get(&order.field))
            };
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id().cmp(&b.id())
    }
}

// Missing values sort first, then numbers, then strings, then everything else.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
