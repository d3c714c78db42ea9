//! loangate - loan record transition CLI
//!
//! Proposes field changes on loan records, enforcing the rule catalogue and
//! queueing the automations a committed change triggers.
//!
//! ## Commands
//!
//! - `rules`: List the loaded rule catalogue
//! - `record`: Create, inspect, and audit loan records
//! - `automation`: Manage automation definitions
//! - `propose`: Run a field change through the confirmation coordinator
//! - `queue`: Read back and update queued automations

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, Level};

use loangate_core::{
    ConfirmationCoordinator, CoordinatorStores, Decision, EngineConfig, RuleRegistry,
    TransitionRequest, TransitionResult, METRICS,
};
use loangate_state::{
    AutomationDefinition, AutomationQueue, AutomationStore, QueueEntryId, QueueStatus,
    RecipientType, RecordId, RecordSnapshot, RecordStore, RelatedDocument,
    RelatedDocumentReader, SurrealLoanStore,
};

#[derive(Parser)]
#[command(name = "loangate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Loan record transition gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Rule catalogue (TOML); overrides LOANGATE_CATALOG
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the rules in the active catalogue
    Rules,

    /// Loan record operations
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Automation definition operations
    Automation {
        #[command(subcommand)]
        action: AutomationAction,
    },

    /// Propose a field change on a loan record
    Propose {
        /// Loan record ID
        #[arg(long)]
        record: String,

        /// Field to change (e.g. status)
        #[arg(long)]
        field: String,

        /// Target value
        #[arg(long)]
        value: String,

        /// Who is making the change
        #[arg(long)]
        actor: String,

        /// Override a bypassable rule
        #[arg(long)]
        bypass: bool,

        /// Answer the automation prompt up front
        #[arg(long, value_enum)]
        decision: Option<DecisionArg>,
    },

    /// Automation queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// Create or replace a loan record
    Put {
        /// Loan record ID
        #[arg(long)]
        id: String,

        /// Field value as key=value (repeatable)
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,

        /// Document kind on file (repeatable)
        #[arg(long = "doc")]
        documents: Vec<String>,

        /// A signed contract is on file
        #[arg(long)]
        contract: bool,

        /// Relation whose documents are complete (repeatable)
        #[arg(long = "related-complete")]
        related_complete: Vec<String>,
    },

    /// Show a loan record
    Show {
        /// Loan record ID
        id: String,
    },

    /// Show the field change history of a loan record
    History {
        /// Loan record ID
        id: String,
    },

    /// Create or replace a related document slot
    Related {
        /// Loan record ID
        #[arg(long)]
        id: String,

        /// Relation name (e.g. condo)
        #[arg(long)]
        relation: String,

        /// Document kind
        #[arg(long)]
        kind: String,

        /// The slot must be filled
        #[arg(long)]
        required: bool,

        /// The document is on file
        #[arg(long)]
        present: bool,
    },
}

#[derive(Subcommand)]
enum AutomationAction {
    /// Create or replace an on-field-change automation
    Add {
        /// Automation ID
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Recipient type (borrower, co_borrower, loan_officer, ...)
        #[arg(long)]
        recipient: RecipientType,

        /// Trigger field
        #[arg(long)]
        field: String,

        /// Trigger target value
        #[arg(long)]
        value: String,

        /// Message template ID
        #[arg(long)]
        template: Option<String>,

        /// Store the definition inactive
        #[arg(long)]
        inactive: bool,
    },

    /// List automation definitions
    List,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queue entries
    List {
        /// Only entries for this record
        #[arg(long)]
        record: Option<String>,

        /// Only entries in this status (pending, sent, failed)
        #[arg(long)]
        status: Option<QueueStatus>,
    },

    /// Mark an entry as sent
    Sent {
        /// Queue entry ID
        id: String,
    },

    /// Mark an entry as failed
    Failed {
        /// Queue entry ID
        id: String,

        /// Delivery error
        #[arg(long)]
        error: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DecisionArg {
    /// Queue the matched automations
    Send,
    /// Keep the change without queueing anything
    Skip,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Send => Decision::SendAndApply,
            DecisionArg::Skip => Decision::ApplyOnly,
        }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    loangate_core::init_tracing(cli.json, level);

    let mut config = EngineConfig::from_env();
    if let Some(path) = cli.catalog {
        config = config.with_catalog_path(path);
    }

    let store = SurrealLoanStore::from_env()
        .await
        .context("Failed to connect to loangate database")?;

    let result = match cli.command {
        Commands::Rules => cmd_rules(&config),
        Commands::Record { action } => match action {
            RecordAction::Put {
                id,
                fields,
                documents,
                contract,
                related_complete,
            } => cmd_record_put(&store, &id, fields, documents, contract, related_complete).await,
            RecordAction::Show { id } => cmd_record_show(&store, &id).await,
            RecordAction::History { id } => cmd_record_history(&store, &id).await,
            RecordAction::Related {
                id,
                relation,
                kind,
                required,
                present,
            } => cmd_record_related(&store, &id, &relation, &kind, required, present).await,
        },
        Commands::Automation { action } => match action {
            AutomationAction::Add {
                id,
                name,
                recipient,
                field,
                value,
                template,
                inactive,
            } => {
                let mut definition =
                    AutomationDefinition::on_field_change(id, name, recipient, field, value);
                if let Some(template) = template {
                    definition = definition.with_template(template);
                }
                if inactive {
                    definition = definition.inactive();
                }
                cmd_automation_add(&store, definition).await
            }
            AutomationAction::List => cmd_automation_list(&store).await,
        },
        Commands::Propose {
            record,
            field,
            value,
            actor,
            bypass,
            decision,
        } => {
            let mut request = TransitionRequest::new(RecordId::new(record), field, value, actor);
            if bypass {
                request = request.with_bypass();
            }
            cmd_propose(&store, &config, request, decision.map(Decision::from)).await
        }
        Commands::Queue { action } => match action {
            QueueAction::List { record, status } => {
                cmd_queue_list(&store, record.map(RecordId::new).as_ref(), status).await
            }
            QueueAction::Sent { id } => cmd_queue_sent(&store, &id).await,
            QueueAction::Failed { id, error } => cmd_queue_failed(&store, &id, &error).await,
        },
    };

    METRICS.flush();
    result
}

fn load_registry(config: &EngineConfig) -> Result<RuleRegistry> {
    config
        .load_registry()
        .context("Failed to load rule catalogue")
}

/// List the rules in the active catalogue
fn cmd_rules(config: &EngineConfig) -> Result<()> {
    let registry = load_registry(config)?;
    if registry.is_empty() {
        println!("No rules in catalogue");
        return Ok(());
    }

    for rule in registry.rules() {
        println!(
            "{} = {}",
            registry.field_label(rule.field()),
            rule.target_value()
        );
        println!("    {}", rule.message());
        if let Some(label) = rule.action_label() {
            println!("    action: {} ({})", label, rule.action_kind());
        }
        if rule.is_bypassable() {
            println!("    bypassable");
        }
        if let Some(check) = rule.async_check() {
            println!("    check: {}", check);
        }
    }
    Ok(())
}

/// Create or replace a loan record
async fn cmd_record_put(
    store: &SurrealLoanStore,
    id: &str,
    fields: Vec<(String, String)>,
    documents: Vec<String>,
    contract: bool,
    related_complete: Vec<String>,
) -> Result<()> {
    let mut snapshot = RecordSnapshot::new(RecordId::new(id)).with_contract(contract);
    for (field, value) in fields {
        snapshot = snapshot.with_field(field, value);
    }
    for kind in documents {
        snapshot = snapshot.with_document(kind);
    }
    for relation in related_complete {
        snapshot = snapshot.with_related(relation, true);
    }

    store
        .save_record(snapshot)
        .await
        .context(format!("Failed to save record {}", id))?;
    info!(record_id = %id, "record saved");
    println!("Saved record {}", id);
    Ok(())
}

/// Show a loan record
async fn cmd_record_show(store: &SurrealLoanStore, id: &str) -> Result<()> {
    let snapshot = store
        .snapshot(&RecordId::new(id))
        .await
        .context(format!("Failed to read record {}", id))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Show the field change history of a loan record
async fn cmd_record_history(store: &SurrealLoanStore, id: &str) -> Result<()> {
    let history = store
        .field_history(&RecordId::new(id))
        .await
        .context(format!("Failed to read history for {}", id))?;

    if history.is_empty() {
        println!("No changes recorded for '{}'", id);
        return Ok(());
    }

    for change in history {
        println!("change {}", change.change_id);
        println!("Actor: {}", change.actor);
        println!(
            "Date:  {}",
            change.changed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!(
            "    {}: {} -> {}",
            change.field,
            change.old_value.as_deref().unwrap_or("(unset)"),
            change.new_value
        );
        if let Some(rule) = change.bypassed_rule {
            println!("    bypassed: {}", rule);
        }
        println!();
    }
    Ok(())
}

/// Create or replace a related document slot
async fn cmd_record_related(
    store: &SurrealLoanStore,
    id: &str,
    relation: &str,
    kind: &str,
    required: bool,
    present: bool,
) -> Result<()> {
    let document = RelatedDocument::new(RecordId::new(id), relation, kind)
        .required(required)
        .present(present);
    store
        .save_related_document(document)
        .await
        .context(format!("Failed to save {} document {}", relation, kind))?;
    println!("Saved {} document '{}' for {}", relation, kind, id);
    Ok(())
}

/// Create or replace an automation definition
async fn cmd_automation_add(store: &SurrealLoanStore, definition: AutomationDefinition) -> Result<()> {
    let id = definition.id.clone();
    store
        .save_automation(definition)
        .await
        .context(format!("Failed to save automation {}", id))?;
    println!("Saved automation {}", id);
    Ok(())
}

/// List automation definitions
async fn cmd_automation_list(store: &SurrealLoanStore) -> Result<()> {
    let definitions = store
        .list_automations()
        .await
        .context("Failed to list automations")?;

    if definitions.is_empty() {
        println!("No automations defined");
        return Ok(());
    }

    for d in definitions {
        let marker = if d.active { "*" } else { " " };
        println!(
            "{} {:<24} {}={} -> {}{}",
            marker,
            d.id,
            d.trigger_field,
            d.trigger_target_value,
            d.recipient_type,
            d.template_id
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Ask on stdin whether to queue the matched automations.
async fn prompt_decision(count: usize) -> Result<Decision> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("Queue {} automation(s)? [y/N] ", count).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read decision")?;
    Ok(match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::SendAndApply,
        _ => Decision::ApplyOnly,
    })
}

/// Run a field change through the confirmation coordinator
async fn cmd_propose(
    store: &SurrealLoanStore,
    config: &EngineConfig,
    request: TransitionRequest,
    decision: Option<Decision>,
) -> Result<()> {
    let registry = load_registry(config)?;
    let coordinator = ConfirmationCoordinator::new(
        registry,
        CoordinatorStores::shared(Arc::new(store.clone())),
        config,
    );

    let record_id = request.record_id.clone();
    let field = request.field.clone();
    let result = coordinator
        .propose(request)
        .await
        .context(format!("Failed to propose change to {} on {}", field, record_id))?;

    for warning in result.warnings() {
        println!("warning: {}", serde_json::to_string(warning)?);
    }

    match &result {
        TransitionResult::Blocked {
            field_label,
            attempted_value,
            reason,
            ..
        } => {
            println!("Blocked: {} cannot become '{}'", field_label, attempted_value);
            println!("    {}", reason);
            if let Some((kind, Some(label))) = result.required_action() {
                println!("    action: {} ({})", label, kind);
            }
        }
        TransitionResult::Cancelled {
            field_label,
            attempted_value,
        } => {
            println!("Cancelled: {} -> '{}'", field_label, attempted_value);
        }
        TransitionResult::Applied {
            change,
            field_label,
            ..
        } => {
            println!(
                "Applied: {} {} -> {}",
                field_label,
                change.old_value.as_deref().unwrap_or("(unset)"),
                change.new_value
            );
        }
        TransitionResult::AppliedPendingDecision {
            change,
            automations,
            field_label,
            ..
        } => {
            println!(
                "Applied: {} {} -> {}",
                field_label,
                change.old_value.as_deref().unwrap_or("(unset)"),
                change.new_value
            );
            println!("Matched automations:");
            for automation in automations {
                println!("  {} ({})", automation.name, automation.recipient_type);
            }

            let decision = match decision {
                Some(decision) => decision,
                None => prompt_decision(automations.len()).await?,
            };
            let dispatched = coordinator
                .resolve_decision(&record_id, &field, decision)
                .await
                .context("Failed to resolve automation decision")?;

            println!("Decision: {}", dispatched.decision);
            for enqueued in &dispatched.report.entries {
                let note = if enqueued.inserted { "" } else { " (already queued)" };
                println!(
                    "  queued {} for {}{}",
                    enqueued.entry.id, enqueued.entry.automation_id, note
                );
            }
            for failure in &dispatched.report.failures {
                println!(
                    "  failed {}: {}{}",
                    failure.automation_id,
                    failure.error,
                    if failure.transient { " (retryable)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

/// List queue entries
async fn cmd_queue_list(
    store: &SurrealLoanStore,
    record: Option<&RecordId>,
    status: Option<QueueStatus>,
) -> Result<()> {
    let entries = store
        .list_entries(record, status)
        .await
        .context("Failed to list queue entries")?;

    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for entry in &entries {
        *by_status.entry(entry.status.as_str()).or_default() += 1;
        println!(
            "{} {:<8} {} {}={} ({})",
            entry.id,
            entry.status,
            entry.automation_id,
            entry.field,
            entry.new_value,
            entry.record_id
        );
        if let Some(error) = &entry.error {
            println!("    error: {}", error);
        }
    }
    let summary: Vec<String> = by_status
        .into_iter()
        .map(|(status, n)| format!("{} {}", n, status))
        .collect();
    println!("\n{}", summary.join(", "));
    Ok(())
}

/// Mark a queue entry as sent
async fn cmd_queue_sent(store: &SurrealLoanStore, id: &str) -> Result<()> {
    let entry = store
        .mark_sent(&QueueEntryId(id.to_string()))
        .await
        .context(format!("Failed to mark {} sent", id))?;
    println!("{} -> {}", entry.id, entry.status);
    Ok(())
}

/// Mark a queue entry as failed
async fn cmd_queue_failed(store: &SurrealLoanStore, id: &str, error: &str) -> Result<()> {
    if error.trim().is_empty() {
        bail!("--error must describe the delivery failure");
    }
    let entry = store
        .mark_failed(&QueueEntryId(id.to_string()), error)
        .await
        .context(format!("Failed to mark {} failed", id))?;
    println!("{} -> {}", entry.id, entry.status);
    Ok(())
}
