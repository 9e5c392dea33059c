#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use ffv_state::ViewerState;
use ffv_state::constants::config::LOG_LEVEL_ENV;
use ffv_state::settings::{MigrationOutcome, ResetOptions, SettingCategory, run_migrations};
use ffv_state::storage::{FileStorage, KeyValueStore};

#[derive(Parser)]
#[command(name = "ffv-state", version, about = "Inspect and edit FIT viewer state and settings")]
struct Cli {
    /// Storage file (defaults to the platform config directory)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read, write, reset, export or import settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Run pending storage migrations
    Migrate,
    /// Print the full state tree after start-up
    Snapshot,
    /// Load a decoded FIT payload (JSON) and print its data-quality report
    Inspect { payload: PathBuf },
}

#[derive(Subcommand)]
enum SettingsAction {
    Get {
        category: SettingCategory,
        key: Option<String>,
    },
    /// VALUE is parsed as JSON, falling back to a plain string
    Set {
        category: SettingCategory,
        value: String,
        #[arg(long)]
        key: Option<String>,
    },
    Reset {
        category: Option<SettingCategory>,
        #[arg(long)]
        silent: bool,
    },
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Import { file: PathBuf },
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn run_settings(viewer: &ViewerState, action: SettingsAction) -> Result<()> {
    let settings = &viewer.settings;
    match action {
        SettingsAction::Get { category, key } => {
            let value = settings.try_get_setting(category, key.as_deref())?;
            print_json(&value)
        }
        SettingsAction::Set { category, value, key } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            settings
                .try_set_setting(category, value, key.as_deref())
                .with_context(|| format!("Failed to update {category} settings"))?;
            info!(category = %category, key = ?key, "Setting updated");
            Ok(())
        }
        SettingsAction::Reset { category, silent } => {
            if !settings.reset_settings(category, ResetOptions { silent }) {
                bail!("Some settings could not be reset; see log for details");
            }
            Ok(())
        }
        SettingsAction::Export { output } => {
            let export = settings.export_settings();
            match output {
                Some(path) => {
                    let encoded = serde_json::to_string_pretty(&export)?;
                    fs::write(&path, encoded)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), "Settings exported");
                    Ok(())
                }
                None => print_json(&export),
            }
        }
        SettingsAction::Import { file } => {
            let payload = read_json(&file)?;
            if !settings.import_settings(&payload) {
                bail!("Import finished with rejected categories; see log for details");
            }
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let path = cli.storage.unwrap_or_else(FileStorage::default_path);
    let storage = FileStorage::open(&path)
        .with_context(|| format!("Failed to open storage at {}", path.display()))?;
    let storage: Rc<dyn KeyValueStore> = Rc::new(storage);

    if let Command::Migrate = cli.command {
        match run_migrations(storage.as_ref())? {
            MigrationOutcome::UpToDate => println!("Storage already up to date"),
            MigrationOutcome::Migrated { from, renamed } => println!(
                "Migrated from {} ({renamed} keys renamed)",
                from.as_deref().unwrap_or("unversioned")
            ),
        }
        return Ok(());
    }

    let viewer = ViewerState::new(storage);
    match cli.command {
        Command::Settings { action } => run_settings(&viewer, action),
        Command::Snapshot => print_json(&viewer.snapshot()),
        Command::Inspect { payload } => {
            let data = read_json(&payload)?;
            viewer.fit_file.start_file_loading(&payload.display().to_string());
            let quality = viewer.fit_file.handle_file_loaded(data);
            print_json(&serde_json::json!({
                "phase": format!("{:?}", viewer.fit_file.phase()),
                "quality": quality,
                "processed": viewer.fit_file.loading_state().processed_data,
            }))
        }
        Command::Migrate => Ok(()),
    }
}
