//! # GT Console CLI (`gtc`)
//!
//! Browse and populate the annotation hierarchy from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! gtc --config ./config/gtc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gtc session` | Show, store, or clear the bearer token |
//! | `gtc variants` / `parts` / `captures` | Browse, create and delete hierarchy nodes |
//! | `gtc items` | Report-table rows of a capture |
//! | `gtc modules` | Modules of a capture; create module structure |
//! | `gtc entries add` | Add a ground-truth entry and map the module's class |
//! | `gtc classes` | Class registry and Module↔Class mappings |
//! | `gtc models list` | Model catalogs |
//! | `gtc fetch-all <variant>` | Aggregate a variant's full hierarchy |
//!
//! Logs go to stderr (`RUST_LOG`, default `gt_console=info`); results go to
//! stdout.

use clap::{Parser, Subcommand};
use gt_console::config;
use gt_console::console;
use gt_console::gateway::{Gateway, GatewayError};
use gt_console::orchestrate::{CaptureFields, EntryFields, ModuleConfig, ReportRow};
use gt_console::progress::ProgressMode;
use gt_console::resolver::ClassChoice;
use gt_console_core::models::{ClassType, DetectionEntry, ModelCatalog, ModuleType, OcrEntry};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// GT Console: a data-entry console for OCR/detection ground truth.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the backend URL and session settings.
#[derive(Parser)]
#[command(
    name = "gtc",
    about = "GT Console: browse and populate an OCR/detection ground-truth hierarchy",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gtc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bearer token management.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    Variants {
        #[command(subcommand)]
        action: VariantAction,
    },
    Parts {
        #[command(subcommand)]
        action: PartAction,
    },
    Captures {
        #[command(subcommand)]
        action: CaptureAction,
    },
    /// Report-table rows.
    Items {
        #[command(subcommand)]
        action: ItemAction,
    },
    Modules {
        #[command(subcommand)]
        action: ModuleAction,
    },
    /// Ground-truth entries.
    Entries {
        #[command(subcommand)]
        action: EntryAction,
    },
    Classes {
        #[command(subcommand)]
        action: ClassAction,
    },
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Walk every Part → Capture → Module → entry of a variant and print
    /// the assembled report.
    FetchAll {
        variant: String,
        /// Print the report as JSON instead of a tree.
        #[arg(long)]
        json: bool,
        /// Progress on stderr: auto, off, human, or json.
        #[arg(long, default_value = "auto")]
        progress: ProgressMode,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    Status,
    SetToken { token: String },
    SignOut,
}

#[derive(Subcommand)]
enum VariantAction {
    List,
    Create { name: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum PartAction {
    List { variant: String },
    Create { variant: String, name: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum CaptureAction {
    List {
        variant: String,
        part: String,
    },
    /// Create a capture. Without `--order` it is appended after the
    /// existing captures of the part.
    Create {
        variant: String,
        part: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        image: Option<String>,
        /// Numeric image flag.
        #[arg(long)]
        flag: Option<i64>,
        /// Boolean image flag, sent as 1/0 when `--flag` is absent.
        #[arg(long)]
        image_flag: Option<bool>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    List {
        capture: String,
    },
    Add {
        variant: String,
        part: String,
        #[arg(long, default_value = "")]
        regulation: String,
        #[arg(long, default_value = "")]
        drawing: String,
        #[arg(long)]
        index: i64,
        #[arg(long)]
        entry_type: i64,
        /// Module whose ground truth backs this row.
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        extraction_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModuleAction {
    List {
        capture: String,
    },
    /// Create module structure (no ground truth yet).
    Create {
        capture: String,
        #[arg(long = "type")]
        module_type: ModuleType,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        detection_model: Option<String>,
        /// OCR modules only.
        #[arg(long)]
        recognition_model: Option<String>,
    },
}

#[derive(Subcommand)]
enum EntryAction {
    /// Add an entry and map the module's class.
    Add {
        capture: String,
        module: String,
        #[command(subcommand)]
        kind: EntryKind,
    },
}

#[derive(Subcommand)]
enum EntryKind {
    Ocr {
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "")]
        option_key: String,
        #[arg(long, default_value = "")]
        option_label: String,
        #[arg(long, default_value = "exact")]
        match_type: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "")]
        suffix: String,
        #[arg(long, default_value = "")]
        master_key: String,
        #[arg(long)]
        not_selectable: bool,
    },
    Detection {
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "")]
        option_key: String,
        #[arg(long, default_value = "")]
        option_label: String,
        /// Repeatable.
        #[arg(long = "master-option-key")]
        master_option_keys: Vec<String>,
        #[arg(long)]
        not_selectable: bool,
    },
}

#[derive(Subcommand)]
enum ClassAction {
    /// The global class registry.
    List,
    /// Classes mapped to a module.
    Module { module: String },
    /// Map a class to a module: an existing class by id, or by name
    /// (created when absent).
    Map {
        capture: String,
        module: String,
        #[arg(long, conflicts_with_all = ["name", "class_type"])]
        class_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Type of a new class: text or detection.
        #[arg(long = "type")]
        class_type: Option<ClassType>,
    },
    /// Create a class with an explicit type and map it to a module.
    Create {
        module: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        class_type: ClassType,
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    List {
        #[arg(long, default_value = "all")]
        kind: ModelCatalog,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gt_console=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Browse commands swallow a 401/403 and print an empty result, so the
    // observer flag is checked even when the command itself succeeded.
    let expired = Arc::new(AtomicBool::new(false));
    let result = run(cli, Arc::clone(&expired)).await;

    if expired.load(Ordering::SeqCst) || result.as_ref().is_err_and(is_session_expired) {
        eprintln!("session expired, sign in again");
        std::process::exit(1);
    }
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn is_session_expired(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<GatewayError>()
            .is_some_and(GatewayError::is_session_expired)
    })
}

async fn run(cli: Cli, expired: Arc<AtomicBool>) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let gateway = Gateway::from_config(&cfg)?;
    gateway.on_session_expired(move |status| {
        expired.store(true, Ordering::SeqCst);
        warn!(status, "backend rejected the session token; it has been cleared");
    });
    let gw = &gateway;

    match cli.command {
        Commands::Session { action } => match action {
            SessionAction::Status => console::run_session_status(gw),
            SessionAction::SetToken { token } => console::run_set_token(gw, &token)?,
            SessionAction::SignOut => console::run_sign_out(gw)?,
        },
        Commands::Variants { action } => match action {
            VariantAction::List => console::run_list_variants(gw).await,
            VariantAction::Create { name } => console::run_create_variant(gw, &name).await?,
            VariantAction::Delete { id } => console::run_delete_variant(gw, &id).await?,
        },
        Commands::Parts { action } => match action {
            PartAction::List { variant } => console::run_list_parts(gw, &variant).await,
            PartAction::Create { variant, name } => {
                console::run_create_part(gw, &variant, &name).await?
            }
            PartAction::Delete { id } => console::run_delete_part(gw, &id).await?,
        },
        Commands::Captures { action } => match action {
            CaptureAction::List { variant, part } => {
                console::run_list_captures(gw, &variant, &part).await
            }
            CaptureAction::Create {
                variant,
                part,
                name,
                order,
                image,
                flag,
                image_flag,
            } => {
                let fields = CaptureFields {
                    name,
                    order,
                    image,
                    flag,
                    legacy_image_flag: image_flag,
                };
                console::run_create_capture(gw, &variant, &part, &fields).await?
            }
            CaptureAction::Delete { id } => console::run_delete_capture(gw, &id).await?,
        },
        Commands::Items { action } => match action {
            ItemAction::List { capture } => console::run_list_items(gw, &capture).await,
            ItemAction::Add {
                variant,
                part,
                regulation,
                drawing,
                index,
                entry_type,
                module,
                order,
                extraction_type,
            } => {
                let row = ReportRow {
                    regulation_requirement: regulation,
                    drawing_requirement: drawing,
                    index,
                    order,
                    entry_type,
                    extraction_type,
                };
                console::run_add_item(gw, &variant, &part, module.as_deref(), &row).await?
            }
        },
        Commands::Modules { action } => match action {
            ModuleAction::List { capture } => console::run_list_modules(gw, &capture).await,
            ModuleAction::Create {
                capture,
                module_type,
                order,
                detection_model,
                recognition_model,
            } => {
                let config = ModuleConfig {
                    module_type,
                    order,
                    detection_model_id: detection_model,
                    recognition_model_id: recognition_model,
                };
                console::run_create_module(gw, &capture, &config).await?
            }
        },
        Commands::Entries { action } => match action {
            EntryAction::Add {
                capture,
                module,
                kind,
            } => {
                let fields = entry_fields(kind);
                console::run_add_entry(gw, &capture, &module, &fields).await?
            }
        },
        Commands::Classes { action } => match action {
            ClassAction::List => console::run_list_classes(gw).await?,
            ClassAction::Module { module } => console::run_module_classes(gw, &module).await,
            ClassAction::Map {
                capture,
                module,
                class_id,
                name,
                class_type,
            } => {
                let choice = ClassChoice {
                    class_id,
                    name,
                    class_type,
                };
                console::run_map_class(gw, &capture, &module, &choice).await?
            }
            ClassAction::Create {
                module,
                name,
                class_type,
                model,
            } => {
                console::run_create_class(gw, &name, class_type, &module, model.as_deref())
                    .await?
            }
        },
        Commands::Models { action } => match action {
            ModelAction::List { kind } => console::run_list_models(gw, kind).await,
        },
        Commands::FetchAll {
            variant,
            json,
            progress,
        } => console::run_fetch_all(gw, &variant, json, progress).await?,
    }

    Ok(())
}

fn entry_fields(kind: EntryKind) -> EntryFields {
    match kind {
        EntryKind::Ocr {
            value,
            option_key,
            option_label,
            match_type,
            prefix,
            suffix,
            master_key,
            not_selectable,
        } => EntryFields::Ocr(OcrEntry {
            value,
            option_key,
            option_label,
            match_type,
            prefix,
            suffix,
            master_key,
            is_user_selectable: !not_selectable,
        }),
        EntryKind::Detection {
            class,
            option_key,
            option_label,
            master_option_keys,
            not_selectable,
        } => EntryFields::Detection(DetectionEntry {
            class_value: class,
            class_name: None,
            option_key,
            option_label,
            master_option_keys,
            is_user_selectable: !not_selectable,
        }),
    }
}
