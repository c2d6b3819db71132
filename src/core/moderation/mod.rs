// Core moderation module - the moderation queue and its state machine.
// Storage lives behind `ModerationStore`; implementations are in infra.

pub mod authorization;
pub mod moderated;
pub mod moderation_errors;
pub mod moderation_models;
pub mod moderation_service;
pub mod moderation_store;
pub mod permissions;
pub mod query;
pub mod registry;
pub mod transition_engine;

pub use authorization::*;
pub use moderated::*;
pub use moderation_errors::*;
pub use moderation_models::*;
pub use moderation_service::*;
pub use moderation_store::*;
pub use permissions::*;
pub use query::*;
pub use registry::*;
pub use transition_engine::*;
