//! Command-line interface for Chunkwise
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `analyze`: Print the runtime requirements of chunks
//! - `generate`: Emit the chunk loading runtime for one chunk

mod analyze;
mod generate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use analyze::AnalyzeCommand;
pub use generate::GenerateCommand;

/// Chunkwise - on-demand chunk loading runtime generator
#[derive(Parser, Debug)]
#[command(name = "chunkwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to chunkwise.toml config file
    #[arg(short, long, global = true, default_value = "chunkwise.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print which runtime features each chunk needs
    Analyze(AnalyzeCommand),

    /// Generate the loading runtime for a chunk
    Generate(GenerateCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Analyze(cmd) => cmd.execute().await,
            Commands::Generate(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the Chunkwise banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "Chunkwise".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
