// Implementations of the moderation store port plus the registry file loader.

pub mod in_memory;
pub mod registry_file;
pub mod sqlite_store;

pub use in_memory::InMemoryModerationStore;
pub use registry_file::{load_registry, parse_registry};
pub use sqlite_store::SqliteModerationStore;
