//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `tripsync_core` linkage and database bootstrap from a shell.
//! - Keep output deterministic for quick local sanity checks.

use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tripsync_core::db::migrations::schema_version;
use tripsync_core::db::{open_db_in_memory, open_db_with_config};
use tripsync_core::{init_logging, EngineConfig};

/// Opens (and migrates) a trip database and prints version information.
#[derive(Parser, Debug)]
#[command(name = "tripsync_cli", version)]
struct Args {
    /// SQLite database file; an in-memory database is used when omitted.
    db_path: Option<PathBuf>,
    /// JSON engine configuration file.
    #[arg(long, value_name = "CONFIG_JSON")]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("read {}: {err}", path.display()))?;
    EngineConfig::from_json_str(&raw).map_err(|err| err.to_string())
}

fn run(args: Args) -> Result<(), String> {
    let config = load_config(args.config.as_deref())?;
    init_logging(&config).map_err(|err| err.to_string())?;

    let conn = match args.db_path.as_deref() {
        Some(path) => open_db_with_config(path, &config),
        None => open_db_in_memory(),
    }
    .map_err(|err| err.to_string())?;
    let version = schema_version(&conn).map_err(|err| err.to_string())?;
    info!("event=cli_check module=cli status=ok schema_version={version}");

    println!("tripsync_core ping={}", tripsync_core::ping());
    println!("tripsync_core version={}", tripsync_core::core_version());
    println!("tripsync_core schema_version={version}");
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tripsync_cli: {err}");
            ExitCode::FAILURE
        }
    }
}
