// The core module contains all business logic.
// No storage or presentation code lives here.

#[path = "moderation/mod.rs"]
pub mod moderation;
