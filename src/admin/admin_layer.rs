// Admin layer - the moderation screens' view of the core.
// Translates request parameters and admin hooks into service calls.

#[path = "request_params.rs"]
pub mod request_params;

#[path = "model_admin.rs"]
pub mod model_admin;

pub use model_admin::{AdminAction, FilterChoice, ModelAdmin};
pub use request_params::RequestParams;
