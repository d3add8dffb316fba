use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Virtual Assistant - provisions a managed support agent and serves its chat front end
#[derive(Parser, Debug, Clone)]
#[command(name = "va", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "VA_CONFIG", default_value = "virtual-assistant.toml", global = true)]
    pub config: PathBuf,

    /// Cloud region, overriding the ambient one
    #[arg(long, env = "VA_REGION", global = true)]
    pub region: Option<String>,

    /// Server host address
    #[arg(long, env = "VA_HOST", global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "VA_PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the bucket, knowledge base, agent and alias
    Setup {
        /// Run against an in-process provider instead of the cloud
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete everything setup created; tolerant of partial state
    Teardown {
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve the chat front end (default)
    Serve,
    /// Print the identifiers of an existing deployment
    Outputs,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
