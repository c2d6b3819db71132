// This is the entry point of the moderation admin tool.
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Dispatch the requested admin command

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use content_monitor::admin::{ModelAdmin, RequestParams};
use content_monitor::core::moderation::{
    EntityType, ModerationEvent, ModerationListener, ModerationService, ObjectRef, StaticActor,
    Status,
};
use content_monitor::infra::moderation::{load_registry, SqliteModerationStore};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_DATABASE_URL: &str = "data/monitor.db";
const DEFAULT_REGISTRY_FILE: &str = "monitor_registry.json";

/// monitor-admin - review and moderate content from the command line
#[derive(Parser, Debug)]
#[command(name = "monitor-admin")]
#[command(version, about, long_about = None)]
struct Cli {
    /// SQLite database (falls back to MONITOR_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Registry file (falls back to MONITOR_REGISTRY_FILE)
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Acting user (falls back to MONITOR_USER)
    #[arg(long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the moderated types
    Types,

    /// Show the changelist of a type
    List {
        /// Type as app.model
        entity_type: String,
        /// pending, challenged, approved (or IP, CH, AP)
        #[arg(long)]
        status: Option<String>,
        /// field=value equality filters
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Show one record with its moderation state
    Show { entity_type: String, id: i64 },

    /// Create a record from a JSON object of fields
    Add { entity_type: String, fields: String },

    /// Change fields of a record from a JSON object
    Edit {
        entity_type: String,
        id: i64,
        fields: String,
    },

    /// Run a bulk action (approve_selected, challenge_selected, reset_to_pending)
    Action {
        entity_type: String,
        action: String,
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Delete a record
    Delete { entity_type: String, id: i64 },
}

/// Writes every stored status change to the log.
struct AuditLog;

#[async_trait]
impl ModerationListener for AuditLog {
    async fn on_moderated(&self, event: &ModerationEvent) {
        let origin = event
            .cascaded_from
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(
            object = %event.entry.target,
            from = event.previous.name(),
            to = event.entry.status.name(),
            by = event.entry.status_by.as_deref().unwrap_or("-"),
            cascaded_from = %origin,
            "Moderation audit"
        );
    }
}

/// Builds the acting user from MONITOR_PERMISSIONS (comma separated, `*` for all).
fn actor_from_env(username: String) -> StaticActor {
    let permissions = std::env::var("MONITOR_PERMISSIONS").unwrap_or_default();
    if permissions.trim() == "*" {
        return StaticActor::superuser(username);
    }
    StaticActor::new(username).with_permissions(
        permissions
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    )
}

fn parse_fields(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Fields must be a JSON object")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("Fields must be a JSON object"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let database_url = cli
        .database_url
        .or_else(|| std::env::var("MONITOR_DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let registry_path = cli
        .registry
        .or_else(|| std::env::var("MONITOR_REGISTRY_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_FILE));
    let username = cli
        .user
        .or_else(|| std::env::var("MONITOR_USER").ok())
        .unwrap_or_else(|| "admin".to_string());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let registry = load_registry(&registry_path)
        .with_context(|| format!("Failed to load registry from {}", registry_path.display()))?;
    let store = SqliteModerationStore::new(&database_url)
        .await
        .context("Failed to initialize SQLite store")?;
    let service = Arc::new(
        ModerationService::new(Arc::new(registry), Arc::new(store)).with_listener(Arc::new(AuditLog)),
    );
    let actor = actor_from_env(username);

    let admin_for = |raw: &str| -> anyhow::Result<ModelAdmin<SqliteModerationStore>> {
        let entity_type: EntityType = raw.parse()?;
        Ok(ModelAdmin::new(Arc::clone(&service), entity_type))
    };

    match cli.command {
        Command::Types => {
            for entity_type in service.registry().types() {
                println!("{}", entity_type);
            }
        }
        Command::List {
            entity_type,
            status,
            filters,
        } => {
            let admin = admin_for(&entity_type)?;
            let mut params = RequestParams::new();
            if let Some(status) = status {
                let status: Status = status.parse()?;
                params.insert("status", status.code());
            }
            for filter in filters {
                let (field, value) = filter
                    .split_once('=')
                    .with_context(|| format!("Filter '{}' is not field=value", filter))?;
                params.insert(field, value);
            }

            let choices: Vec<String> = admin
                .status_filter_choices(&params)
                .iter()
                .map(|c| if c.selected { format!("[{}]", c.label) } else { c.label.to_string() })
                .collect();
            println!("{}", choices.join(" | "));

            let rows = admin.changelist(&mut params).await?;
            println!("{}", admin.list_display().join("\t"));
            for row in &rows {
                println!("{}", admin.list_row(row).join("\t"));
            }
        }
        Command::Show { entity_type, id } => {
            let entity_type: EntityType = entity_type.parse()?;
            let object = ObjectRef::new(entity_type, id);
            let found = service
                .get(&object)
                .await?
                .with_context(|| format!("{} not found", object))?;
            println!("{}", serde_json::to_string_pretty(&found.to_json())?);
        }
        Command::Add {
            entity_type,
            fields,
        } => {
            let admin = admin_for(&entity_type)?;
            let created = admin.add(&actor, parse_fields(&fields)?).await?;
            println!("{}", serde_json::to_string_pretty(&created.to_json())?);
        }
        Command::Edit {
            entity_type,
            id,
            fields,
        } => {
            let admin = admin_for(&entity_type)?;
            let saved = admin.save_change(&actor, id, parse_fields(&fields)?).await?;
            println!("{}", serde_json::to_string_pretty(&saved.to_json())?);
        }
        Command::Action {
            entity_type,
            action,
            ids,
        } => {
            let admin = admin_for(&entity_type)?;
            let report = admin.run_action(&actor, &action, &ids).await?;
            println!("{}", report.summary());
        }
        Command::Delete { entity_type, id } => {
            let admin = admin_for(&entity_type)?;
            admin.delete(&actor, id).await?;
            println!("Deleted {}#{}", entity_type, id);
        }
    }

    Ok(())
}
