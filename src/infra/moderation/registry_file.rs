// Loads the moderation registry from a JSON file.
//
// {
//   "types": [
//     { "schema": { "entity_type": "testapp.book", "primary_key": "id", "fields": ["name"] },
//       "related": [{ "entity_type": "testapp.supplement", "via_field": "book" }] },
//     { "schema": { "entity_type": "testapp.ebook", "primary_key": "book_ptr" },
//       "cascade_parent": "testapp.book" }
//   ]
// }

use crate::core::moderation::{ConfigurationError, EntitySchema, ModerationRegistry, Registration};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    types: Vec<TypeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TypeEntry {
    schema: EntitySchema,
    #[serde(flatten)]
    registration: Registration,
}

pub fn load_registry(path: impl AsRef<Path>) -> Result<ModerationRegistry, ConfigurationError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let parsed: RegistryFile = serde_json::from_reader(BufReader::new(file))?;

    let registry = build(parsed)?;
    tracing::info!(
        path = %path.display(),
        types = registry.len(),
        "Loaded moderation registry"
    );
    Ok(registry)
}

pub fn parse_registry(json: &str) -> Result<ModerationRegistry, ConfigurationError> {
    build(serde_json::from_str(json)?)
}

fn build(file: RegistryFile) -> Result<ModerationRegistry, ConfigurationError> {
    let mut builder = ModerationRegistry::builder();
    for entry in file.types {
        builder.register(entry.schema, entry.registration)?;
    }
    builder.build()
}
