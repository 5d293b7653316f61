//! ReviewFlow command line tool.
//!
//! `validate` works offline against a directory of workflow definitions;
//! every other command talks to a running `reviewflow-server`.

mod client;

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reviewflow_engine::{actions::ActionRegistry, definition::DefinitionRegistry};
use serde_json::Value;
use uuid::Uuid;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "reviewflow")]
#[command(version, about = "ReviewFlow Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// ReviewFlow server URL
    #[arg(
        long,
        global = true,
        env = "REVIEWFLOW_SERVER_URL",
        default_value = "http://localhost:8084"
    )]
    server_url: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate workflow definitions without a server
    ///
    /// Examples:
    ///     reviewflow validate ./config/workflows
    #[command(verbatim_doc_comment)]
    Validate {
        /// Directory of *.yaml / *.yml workflow files
        dir: PathBuf,
    },

    /// List workflows loaded by the server
    Workflows,

    /// Submit a content item and start its workflow
    ///
    /// Examples:
    ///     reviewflow start --container theses --submitter alice --title "On Claims"
    ///     reviewflow start --container theses --submitter alice --set language=en
    #[command(verbatim_doc_comment)]
    Start {
        #[arg(short, long)]
        container: String,

        #[arg(short, long)]
        submitter: String,

        #[arg(short, long)]
        title: Option<String>,

        /// Metadata as a JSON object
        #[arg(long, value_name = "JSON")]
        metadata: Option<String>,

        /// Single metadata field, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Do not notify the reviewers of the first step
        #[arg(long)]
        no_notify: bool,
    },

    /// Show a workflow item with its tasks
    Show { item_id: Uuid },

    /// Show the audit trail of a workflow item
    History { item_id: Uuid },

    /// Pool tasks a principal may claim
    Pool {
        principal: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Tasks a principal has claimed
    Claimed {
        principal: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Claim a pool task
    Claim {
        item_id: Uuid,
        step_id: String,
        principal: String,
    },

    /// Return a claimed task to the pool
    Unclaim {
        item_id: Uuid,
        step_id: String,
        principal: String,
    },

    /// Run an action on a claimed task
    ///
    /// Examples:
    ///     reviewflow execute <ITEM> reviewstep bob approve
    ///     reviewflow execute <ITEM> reviewstep bob reject --reason "missing abstract"
    ///     reviewflow execute <ITEM> editstep erin edit --input '{"metadata":{"language":"en"}}'
    #[command(verbatim_doc_comment)]
    Execute {
        item_id: Uuid,
        step_id: String,
        principal: String,
        action_id: String,

        /// Action input as a JSON object
        #[arg(long, value_name = "JSON")]
        input: Option<String>,

        /// Shorthand for {"reason": ...}
        #[arg(long)]
        reason: Option<String>,
    },

    /// Abort a workflow item (administrators only)
    Abort {
        item_id: Uuid,
        admin: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

/// Parse a JSON object argument.
fn parse_object(raw: Option<&str>, what: &str) -> Result<serde_json::Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str::<Value>(raw).with_context(|| format!("Invalid JSON {}", what))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must be a JSON object, not array or primitive", what),
    }
}

/// Merge `--set key=value` fields over a JSON object.
fn build_metadata(metadata: Option<&str>, fields: &[String]) -> Result<Value> {
    let mut map = parse_object(metadata, "metadata")?;
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            bail!("Invalid field '{}', expected key=value", field);
        };
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Value::Object(map))
}

fn build_input(input: Option<&str>, reason: Option<String>) -> Result<Value> {
    let mut map = parse_object(input, "input")?;
    if let Some(reason) = reason {
        map.insert("reason".to_string(), Value::String(reason));
    }
    Ok(Value::Object(map))
}

fn validate(dir: &PathBuf) -> Result<()> {
    let kinds: BTreeSet<String> = ActionRegistry::with_builtins().kinds();
    let registry = DefinitionRegistry::load_dir(dir, kinds)
        .with_context(|| format!("Invalid workflow definitions in {}", dir.display()))?;

    for definition in registry.definitions() {
        let target = if definition.default {
            "default".to_string()
        } else {
            definition.containers.join(", ")
        };
        println!(
            "{:<24} {:>2} steps  [{}]",
            definition.id(),
            definition.steps.len(),
            target
        );
    }
    println!("{} workflow(s) valid", registry.definitions().len());
    Ok(())
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

fn print_item(item: &Value) {
    println!("Item:      {}", str_field(item, "id"));
    println!("Workflow:  {}", str_field(item, "workflow_id"));
    println!("Container: {}", str_field(item, "container_id"));
    println!("State:     {}", str_field(item, "state"));
    println!("Step:      {}", str_field(item, "current_step"));
    if let Some(content) = item.get("content") {
        println!("Submitter: {}", str_field(content, "submitter"));
        println!("Title:     {}", str_field(content, "title"));
    }
    if let Some(point) = item.get("pending_curation").and_then(|p| p.as_str()) {
        println!("Curation:  waiting ({})", point);
    }
}

fn print_tasks(tasks: &Value, claimed: bool) {
    let Some(tasks) = tasks.as_array() else {
        return;
    };
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }
    for task in tasks {
        let extra = if claimed {
            str_field(task, "claimant").to_string()
        } else {
            format!(
                "{} slot(s)",
                task.get("open_slots").and_then(|s| s.as_u64()).unwrap_or(0)
            )
        };
        println!(
            "{}  {:<16} {}",
            str_field(task, "workflow_item_id"),
            str_field(task, "step_id"),
            extra
        );
    }
}

fn print_history(entries: &Value) {
    let Some(entries) = entries.as_array() else {
        return;
    };
    for entry in entries {
        println!(
            "{:>3}  {:<20} {:<16} {:<16} {:<10} {}",
            entry.get("seq").and_then(|s| s.as_i64()).unwrap_or(0),
            str_field(entry, "recorded_at"),
            str_field(entry, "outcome"),
            str_field(entry, "step_id"),
            str_field(entry, "actor"),
            entry
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
        );
    }
}

fn print_transition(result: &Value) {
    let transition = str_field(result, "transition");
    match transition {
        "advanced" => println!("Advanced to step {}", str_field(result, "step")),
        "awaiting_approvals" => println!(
            "Approval recorded, {} more needed",
            result.get("remaining").and_then(|r| r.as_u64()).unwrap_or(0)
        ),
        "archived" => println!("Archived as {}", str_field(result, "archived_item_id")),
        "returned" => println!("Returned to submitter: {}", str_field(result, "reason")),
        "curation_queued" => println!("Waiting for curation at {}", str_field(result, "step")),
        "input_required" => println!("More input needed, nothing changed"),
        "next_action" => println!("Done, next action is {}", str_field(result, "action")),
        other => println!("{}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let api = ApiClient::new(&cli.server_url);

    let output = match cli.command {
        Commands::Validate { dir } => return validate(&dir),
        Commands::Workflows => {
            let workflows = api.workflows().await?;
            if !cli.json {
                for workflow in workflows.as_array().into_iter().flatten() {
                    let steps: Vec<&str> = workflow
                        .get("steps")
                        .and_then(|s| s.as_array())
                        .into_iter()
                        .flatten()
                        .map(|s| str_field(s, "id"))
                        .collect();
                    println!("{:<24} {}", str_field(workflow, "id"), steps.join(" -> "));
                }
                return Ok(());
            }
            workflows
        }
        Commands::Start {
            container,
            submitter,
            title,
            metadata,
            fields,
            no_notify,
        } => {
            let metadata = build_metadata(metadata.as_deref(), &fields)?;
            let item = api
                .start(&container, &submitter, title.as_deref(), metadata, !no_notify)
                .await?;
            if !cli.json {
                print_item(&item);
                return Ok(());
            }
            item
        }
        Commands::Show { item_id } => {
            let detail = api.item(item_id).await?;
            if !cli.json {
                print_item(&detail);
                println!("\nPool:");
                print_tasks(&detail["pool_tasks"], false);
                println!("\nClaimed:");
                print_tasks(&detail["claimed_tasks"], true);
                return Ok(());
            }
            detail
        }
        Commands::History { item_id } => {
            let entries = api.history(item_id).await?;
            if !cli.json {
                print_history(&entries);
                return Ok(());
            }
            entries
        }
        Commands::Pool {
            principal,
            offset,
            limit,
        } => {
            let tasks = api.pool(&principal, offset, limit).await?;
            if !cli.json {
                print_tasks(&tasks, false);
                return Ok(());
            }
            tasks
        }
        Commands::Claimed {
            principal,
            offset,
            limit,
        } => {
            let tasks = api.claimed(&principal, offset, limit).await?;
            if !cli.json {
                print_tasks(&tasks, true);
                return Ok(());
            }
            tasks
        }
        Commands::Claim {
            item_id,
            step_id,
            principal,
        } => {
            let task = api.claim(item_id, &step_id, &principal).await?;
            if !cli.json {
                println!("{} claimed {} on {}", principal, step_id, item_id);
                return Ok(());
            }
            task
        }
        Commands::Unclaim {
            item_id,
            step_id,
            principal,
        } => {
            let response = api.unclaim(item_id, &step_id, &principal).await?;
            if !cli.json {
                println!("{} returned {} on {} to the pool", principal, step_id, item_id);
                return Ok(());
            }
            response
        }
        Commands::Execute {
            item_id,
            step_id,
            principal,
            action_id,
            input,
            reason,
        } => {
            let input = build_input(input.as_deref(), reason)?;
            let result = api
                .execute(item_id, &step_id, &principal, &action_id, input)
                .await?;
            if !cli.json {
                print_transition(&result);
                return Ok(());
            }
            result
        }
        Commands::Abort {
            item_id,
            admin,
            reason,
        } => {
            let item = api.abort(item_id, &admin, reason.as_deref()).await?;
            if !cli.json {
                print_item(&item);
                return Ok(());
            }
            item
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
