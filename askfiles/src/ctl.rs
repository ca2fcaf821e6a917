//! askfiles-ctl - operator CLI for the askfiles activation table
//!
//! This tool provides commands for:
//! - Checking configuration and table status
//! - Listing, inspecting and toggling activation records
//! - Finding records whose upstream file no longer exists
//!
//! The server reads the activation table once at startup and rewrites it
//! whole on every change. Stop the server before using `deactivate` or
//! `activate` here, or the server's next write discards the edit.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Activation table: $XDG_DATA_HOME/askfiles/file-statuses.json
//! - Config: $XDG_CONFIG_HOME/askfiles/config.toml (~/.config/askfiles/config.toml)

use anyhow::{bail, Context, Result};
use askfiles_core::registry::mask_api_key;
use askfiles_core::{
    normalize_file_ref, ActivationRecord, ActivationStore, Config, GeminiClient, GenerativeBackend,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "askfiles-ctl")]
#[command(about = "Inspect and manage askfiles file activation")]
#[command(version)]
struct Args {
    /// Verbose output (also writes the log file)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and activation table status
    Status,

    /// List activation records
    Records {
        /// Only show deactivated files
        #[arg(short, long)]
        inactive: bool,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the activation state of one file
    Show {
        /// File id, `files/<id>` name or file URI
        file: String,
    },

    /// Exclude a file from "all files" questions (stop the server first)
    Deactivate { file: String },

    /// Make a file eligible for "all files" questions again (stop the server first)
    Activate { file: String },

    /// List records whose file no longer exists upstream (needs an API key)
    Orphans,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(askfiles_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let store = ActivationStore::open(config.activation.resolved_path());

    match args.command {
        Command::Status => cmd_status(&config, &store),
        Command::Records { inactive, json } => cmd_records(&store, inactive, json),
        Command::Show { file } => cmd_show(&store, &file),
        Command::Deactivate { file } => cmd_toggle(&store, &file, false),
        Command::Activate { file } => cmd_toggle(&store, &file, true),
        Command::Orphans => cmd_orphans(&config, &store),
    }
}

fn cmd_status(config: &Config, store: &ActivationStore) -> Result<()> {
    println!("askfiles Configuration");
    println!("======================");
    println!();

    let config_path = Config::config_path();
    println!(
        "Config file:      {} ({})",
        config_path.display(),
        if config_path.exists() { "found" } else { "defaults" }
    );
    match config.gemini.resolved_api_key() {
        Some(key) => println!("API key:          {}", mask_api_key(&key)),
        None => println!("API key:          not configured"),
    }
    println!("Endpoint:         {}", config.gemini.endpoint);
    println!("Models:           {}", config.gemini.models.join(", "));
    println!(
        "Retry:            {} attempts from {}ms, fallback {} attempts from {}ms",
        config.retry.primary_attempts,
        config.retry.primary_initial_delay_ms,
        config.retry.fallback_attempts,
        config.retry.fallback_initial_delay_ms
    );
    println!(
        "Server:           http://{}:{}",
        config.server.host, config.server.port
    );
    println!();

    let records = store.records();
    let inactive = records.iter().filter(|r| !r.active).count();
    if let Some(path) = store.path() {
        println!("Activation table: {}", path.display());
    }
    println!("Records:          {}", records.len());
    println!("Deactivated:      {}", inactive);
    println!(
        "Log file:         {}",
        askfiles_core::logging::log_file_path().display()
    );

    Ok(())
}

fn cmd_records(store: &ActivationStore, inactive_only: bool, as_json: bool) -> Result<()> {
    let records: Vec<ActivationRecord> = store
        .records()
        .into_iter()
        .filter(|r| !inactive_only || !r.active)
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No activation records.");
        return Ok(());
    }

    println!(
        "{:<40} {:<8} {:<25} {:<25}",
        "FILE", "ACTIVE", "DEACTIVATED", "REACTIVATED"
    );
    for record in &records {
        print_record_row(record);
    }
    println!();
    println!("{} record(s)", records.len());
    Ok(())
}

fn print_record_row(record: &ActivationRecord) {
    let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!(
        "{:<40} {:<8} {:<25} {:<25}",
        record.file_id,
        if record.active { "yes" } else { "no" },
        stamp(record.deactivated_at),
        stamp(record.reactivated_at)
    );
}

fn cmd_show(store: &ActivationStore, file: &str) -> Result<()> {
    let file_id = file_id_arg(file)?;
    match store.status(&file_id) {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("{}: no record (active)", file_id),
    }
    Ok(())
}

fn cmd_toggle(store: &ActivationStore, file: &str, active: bool) -> Result<()> {
    let file_id = file_id_arg(file)?;
    let record = if active {
        store.reactivate(&file_id)
    } else {
        store.deactivate(&file_id)
    };
    println!(
        "{}: {}",
        record.file_id,
        if record.active { "activated" } else { "deactivated" }
    );
    Ok(())
}

fn cmd_orphans(config: &Config, store: &ActivationStore) -> Result<()> {
    let Some(api_key) = config.gemini.resolved_api_key() else {
        bail!("no API key configured; set GEMINI_API_KEY or gemini.api_key in config.toml");
    };
    let client = GeminiClient::new(&api_key, &config.gemini).context("failed to create client")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let files = runtime
        .block_on(client.list_all_files())
        .context("failed to list files")?;

    let known: Vec<String> = files.into_iter().map(|f| f.id).collect();
    let orphans = store.orphans(&known);

    if orphans.is_empty() {
        println!("No orphaned records ({} files upstream).", known.len());
        return Ok(());
    }

    println!("Records with no upstream file:");
    for record in &orphans {
        print_record_row(record);
    }
    println!();
    println!("{} orphaned record(s)", orphans.len());
    Ok(())
}

fn file_id_arg(file: &str) -> Result<String> {
    let file_id = normalize_file_ref(file);
    if file_id.is_empty() {
        bail!("file id must not be empty");
    }
    Ok(file_id)
}
