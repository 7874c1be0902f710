//! spdeploy command-line front-end.
//!
//! Manages the repository list and provider instances, starts and
//! stops the supervisor daemon, and views per-repository logs. Exit
//! code 0 on success, 1 on any error.

#![forbid(unsafe_code)]

mod commands;
mod process;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use spdeploy_common::ConfigStore;

#[derive(Parser)]
#[command(name = "spdeploy")]
#[command(author, version, about = "Continuous-deployment supervisor for git repositories")]
struct Cli {
    /// Path to the configuration file (default: OS-conventional location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a repository to the watch list
    Add {
        /// Repository URL (also accepts owner/repo shorthand for GitHub)
        url: String,
        /// Branch to track
        #[arg(short, long)]
        branch: Option<String>,
        /// Local working tree path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Deployment trigger: push, pr, or both
        #[arg(short, long, default_value = "push")]
        trigger: String,
        /// Per-repository token (prefer SPDEPLOY_*_TOKEN environment variables)
        #[arg(long)]
        token: Option<String>,
        /// Deployment script path relative to the working tree
        #[arg(long)]
        script: Option<String>,
    },
    /// Remove repositories from the watch list
    Remove {
        url: String,
        #[arg(short, long)]
        branch: Option<String>,
        /// Only remove the entry at this working tree path
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// List configured repositories
    List,
    /// Start the supervisor daemon
    Start {
        /// Stay attached instead of detaching the daemon
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the supervisor daemon
    Stop,
    /// Show daemon and repository status
    Status,
    /// Show per-repository logs
    Logs {
        /// Repository URL; omit to list available logs
        url: Option<String>,
        /// Number of trailing lines to print
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
    /// Manage git hosting providers
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// Register a self-hosted provider instance
    Register {
        /// Unique instance name (used in SPDEPLOY_<NAME>_TOKEN)
        name: String,
        /// Provider type: github, gitlab, bitbucket, gitea, gogs, or generic
        #[arg(short = 't', long = "type")]
        kind: String,
        /// Base URL of the instance
        #[arg(short, long)]
        base_url: String,
        /// API URL (default: derived from the base URL)
        #[arg(short, long)]
        api_url: Option<String>,
    },
    /// Remove a provider instance
    Remove { name: String },
    /// List registered provider instances
    List,
    /// Detect the provider for a repository URL
    Detect { url: String },
    /// Test provider connectivity and token for a repository URL
    Test { url: String },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default()?,
    };

    match cli.command {
        Commands::Add { url, branch, path, trigger, token, script } => {
            commands::add(&store, url, branch, path, trigger, token, script)
        }
        Commands::Remove { url, branch, path } => {
            commands::remove(&store, &url, branch.as_deref(), path.as_deref())
        }
        Commands::List => commands::list(&store),
        Commands::Start { foreground } => commands::start(&store, foreground),
        Commands::Stop => commands::stop(&store),
        Commands::Status => commands::status(&store),
        Commands::Logs { url, lines } => commands::logs(&store, url.as_deref(), lines),
        Commands::Provider { command } => match command {
            ProviderCommands::Register { name, kind, base_url, api_url } => {
                commands::provider_register(&store, name, &kind, base_url, api_url)
            }
            ProviderCommands::Remove { name } => commands::provider_remove(&store, &name),
            ProviderCommands::List => commands::provider_list(&store),
            ProviderCommands::Detect { url } => commands::provider_detect(&store, &url).await,
            ProviderCommands::Test { url } => commands::provider_test(&store, &url).await,
        },
    }
}
