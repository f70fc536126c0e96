pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod library_parser;
pub mod library_watcher;
pub mod logging;
pub mod models;
pub mod sync;
pub mod system_library;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "songshelf", version, about = "Keeps a folder/album/song library in step with the system music catalog")]
pub struct CliArgs {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output, to stderr and the log file.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run one sync pass and print what changed.
    Sync,
    /// Sync, then keep syncing whenever the catalog changes.
    Watch,
    /// Print the library hierarchy in order.
    Tree,
    /// Verify the stored library against the catalog.
    Check,
}

pub fn run(args: CliArgs) -> Result<ExitCode> {
    let config = Config::load(args.config.as_deref())?;
    logging::init(&config.log_level, config.log_dir.as_deref(), args.verbose)?;

    match args.command {
        Command::Sync => {
            let report = commands::sync_once(&config)?;
            println!("{}", report);
        }
        Command::Watch => commands::watch(&config)?,
        Command::Tree => print!("{}", commands::tree(&config)?),
        Command::Check => {
            let violations = commands::check(&config)?;
            if !violations.is_empty() {
                for violation in &violations {
                    println!("{}", violation);
                }
                println!("{} problem(s) found", violations.len());
                return Ok(ExitCode::FAILURE);
            }
            println!("Library is consistent with the catalog");
        }
    }
    Ok(ExitCode::SUCCESS)
}
