use clap::{Parser, Subcommand};
use std::path::PathBuf;

use app::policy::AccessPolicy;

mod commands;

pub use commands::render_inspection;

#[derive(Parser, Debug)]
#[command(name = "permlock", version)]
#[command(about = "Inspect a file's ACL and switch it between read-only and writable", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set the logging level (debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Additional configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Work on an in-memory copy of the ACL; nothing on disk is changed
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show size, timestamps, owner and access rules of a file
    Inspect {
        /// File to inspect
        path: PathBuf,

        /// Print the inspection as JSON
        #[arg(long)]
        json: bool,
    },

    /// Put a file into the given state
    Set {
        /// File to change
        path: PathBuf,

        /// Target state: read-only or writable
        #[arg(value_parser = parse_policy)]
        policy: AccessPolicy,
    },

    /// Flip a file between read-only and writable
    Toggle {
        /// File to change
        path: PathBuf,
    },
}

fn parse_policy(value: &str) -> Result<AccessPolicy, String> {
    value.parse::<AccessPolicy>().map_err(|e| e.to_string())
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub async fn cli_match(cli: Cli) -> utils::error::Result<()> {
    match cli.command {
        Commands::Inspect { path, json } => commands::inspect_cmd(&path, json, cli.dry_run).await?,
        Commands::Set { path, policy } => commands::set_cmd(&path, policy, cli.dry_run).await?,
        Commands::Toggle { path } => commands::toggle_cmd(&path, cli.dry_run).await?,
    }

    Ok(())
}
