// Authorization rules and bulk-action types.
//
// Approve and challenge need the moderate permission. Resetting to pending
// only needs the change permission: it is treated as a lesser privilege than
// a final verdict, so editors can send their own challenged work back to the
// queue. Keep that asymmetry when touching `required_verb`.

use super::moderation_errors::MonitorError;
use super::moderation_models::{ObjectId, Status};
use super::permissions::{Actor, PermissionVerb};
use super::registry::ModeratedTypeConfig;
use std::fmt;
use std::str::FromStr;

/// Permission verb a transition into `status` requires.
pub fn transition_verb(status: Status) -> PermissionVerb {
    match status {
        Status::Approved | Status::Challenged => PermissionVerb::Moderate,
        Status::Pending => PermissionVerb::Change,
    }
}

// ============================================================================
// BULK ACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkAction {
    ApproveSelected,
    ChallengeSelected,
    ResetToPending,
}

impl BulkAction {
    pub const ALL: [BulkAction; 3] = [
        BulkAction::ApproveSelected,
        BulkAction::ChallengeSelected,
        BulkAction::ResetToPending,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BulkAction::ApproveSelected => "approve_selected",
            BulkAction::ChallengeSelected => "challenge_selected",
            BulkAction::ResetToPending => "reset_to_pending",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BulkAction::ApproveSelected => "Approve selected",
            BulkAction::ChallengeSelected => "Challenge selected",
            BulkAction::ResetToPending => "Reset to pending",
        }
    }

    pub fn target_status(self) -> Status {
        match self {
            BulkAction::ApproveSelected => Status::Approved,
            BulkAction::ChallengeSelected => Status::Challenged,
            BulkAction::ResetToPending => Status::Pending,
        }
    }

    pub fn required_verb(self) -> PermissionVerb {
        transition_verb(self.target_status())
    }

    /// Past-tense verb for result messages.
    fn past_tense(self) -> &'static str {
        match self {
            BulkAction::ApproveSelected => "approved",
            BulkAction::ChallengeSelected => "challenged",
            BulkAction::ResetToPending => "reset to pending",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BulkAction::ALL
            .into_iter()
            .find(|a| a.name() == s.trim())
            .ok_or_else(|| format!("Unknown action '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: ObjectId,
    pub reason: String,
}

/// Aggregated result of a bulk action.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport {
    pub action: BulkAction,
    pub succeeded: Vec<ObjectId>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_success(&mut self, id: ObjectId) {
        self.succeeded.push(id);
    }

    pub fn record_failure(&mut self, id: ObjectId, error: &MonitorError) {
        self.failed.push(BulkFailure {
            id,
            reason: error.to_string(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Message shown to the actor after the action ran.
    pub fn summary(&self) -> String {
        let noun = |n: usize| if n == 1 { "object" } else { "objects" };
        let mut message = format!(
            "{} {} {}.",
            self.succeeded.len(),
            noun(self.succeeded.len()),
            self.action.past_tense()
        );
        if !self.failed.is_empty() {
            let details: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("#{}: {}", f.id, f.reason))
                .collect();
            message.push_str(&format!(
                " {} {} failed ({}).",
                self.failed.len(),
                noun(self.failed.len()),
                details.join("; ")
            ));
        }
        message
    }
}

// ============================================================================
// DELETE POLICY
// ============================================================================

/// Whether `actor` may delete an instance of `config`'s type.
///
/// Approved instances of a type registered with `can_delete_approved = false`
/// are protected from every actor. Everything else defers to the ordinary
/// delete permission. `status` is `None` when asking about the type in general.
pub fn delete_allowed(config: &ModeratedTypeConfig, actor: &dyn Actor, status: Option<Status>) -> bool {
    if !config.can_delete_approved && status == Some(Status::Approved) {
        return false;
    }
    actor.has_permission(&config.permission(PermissionVerb::Delete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{EntitySchema, EntityType, Registration, RegistryBuilder, StaticActor};
    use std::sync::Arc;

    fn config(can_delete_approved: bool) -> Arc<ModeratedTypeConfig> {
        let author = EntityType::new("testapp", "author");
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                EntitySchema::new(author.clone()).primary_key("id").field("name"),
                Registration::default().can_delete_approved(can_delete_approved),
            )
            .unwrap();
        builder.build().unwrap().lookup(&author).unwrap()
    }

    #[test]
    fn test_reset_needs_only_change_permission() {
        assert_eq!(BulkAction::ApproveSelected.required_verb(), PermissionVerb::Moderate);
        assert_eq!(BulkAction::ChallengeSelected.required_verb(), PermissionVerb::Moderate);
        assert_eq!(BulkAction::ResetToPending.required_verb(), PermissionVerb::Change);
    }

    #[test]
    fn test_action_names_parse_back() {
        for action in BulkAction::ALL {
            assert_eq!(action.name().parse::<BulkAction>().unwrap(), action);
        }
        assert!("delete_selected".parse::<BulkAction>().is_err());
    }

    #[test]
    fn test_approved_instances_are_protected_for_everyone() {
        let config = config(false);
        let admin = StaticActor::superuser("root");

        assert!(!delete_allowed(&config, &admin, Some(Status::Approved)));
        assert!(delete_allowed(&config, &admin, Some(Status::Pending)));
        assert!(delete_allowed(&config, &admin, Some(Status::Challenged)));
        assert!(delete_allowed(&config, &admin, None));
    }

    #[test]
    fn test_ordinary_delete_permission_decides_otherwise() {
        let config = config(true);
        let author = config.entity_type().clone();
        let deleter = StaticActor::new("del").grant(PermissionVerb::Delete, &author);
        let viewer = StaticActor::new("view");

        assert!(delete_allowed(&config, &deleter, Some(Status::Approved)));
        assert!(!delete_allowed(&config, &viewer, Some(Status::Pending)));
    }

    #[test]
    fn test_summary_lists_failures() {
        let mut report = BulkReport::new(BulkAction::ApproveSelected);
        report.record_success(1);
        report.record_success(2);
        report.record_failure(
            9,
            &MonitorError::NotFound(crate::core::moderation::ObjectRef::new(
                EntityType::new("testapp", "author"),
                9,
            )),
        );

        assert!(!report.is_complete());
        assert_eq!(
            report.summary(),
            "2 objects approved. 1 object failed (#9: testapp.author#9 not found)."
        );
    }
}
