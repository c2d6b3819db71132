// Content moderation layer.
//
// **Architecture Overview:**
// - `core/` = Moderation logic (status machine, registry, queries, permissions)
// - `infra/` = Implementations of core traits (in-memory, SQLite, registry file)
// - `admin/` = Admin screen hooks built on the core services

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "admin/admin_layer.rs"]
pub mod admin;
#[path = "infra/infra_layer.rs"]
pub mod infra;
