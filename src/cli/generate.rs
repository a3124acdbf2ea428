//! Generate command implementation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::codegen::RuntimeGenerator;
use crate::config::Config;
use crate::graph::{ChunkGraph, ChunkId};
use crate::utils::{format_duration, format_size};

/// Generate the loading runtime for a chunk
#[derive(Args, Debug)]
pub struct GenerateCommand {
    /// Chunk graph JSON produced by the bundler
    #[arg(short, long)]
    pub graph: PathBuf,

    /// Chunk to generate the runtime for
    #[arg(long)]
    pub chunk: String,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

impl GenerateCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        let config = Config::load_or_default(config_path)?;
        let graph = ChunkGraph::load(&self.graph)?;
        let chunk = match graph.resolve_chunk_id(&self.chunk) {
            Some(id) => id.clone(),
            None => self.chunk.parse::<ChunkId>()?,
        };

        let generator = RuntimeGenerator::new(Arc::new(config), graph);
        let runtime = generator.generate(&chunk)?;

        match &self.out {
            Some(path) => {
                tokio::fs::write(path, &runtime.code)
                    .await
                    .with_context(|| format!("Failed to write runtime: {}", path.display()))?;
            }
            None => print!("{}", runtime.code),
        }

        let features: Vec<&str> = [
            (runtime.requirements.needs_on_demand_loading, "on-demand loading"),
            (runtime.requirements.needs_entry_deferral, "entry deferral"),
            (runtime.requirements.needs_prefetch_support, "prefetch"),
            (runtime.requirements.needs_chunk_loading_code, "chunk loading code"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect();

        if runtime.is_empty() {
            eprintln!(
                "{} Chunk {} needs no runtime",
                "✓".green().bold(),
                chunk.to_string().cyan()
            );
        } else {
            eprintln!(
                "{} Generated runtime for chunk {} in {}",
                "✓".green().bold(),
                chunk.to_string().cyan(),
                format_duration(start.elapsed())
            );
            eprintln!(
                "  {} {} {}",
                "•".dimmed(),
                features.join(", "),
                format_size(runtime.size()).dimmed()
            );
        }

        if let Some(path) = &self.out {
            eprintln!("  {} {}", "→".blue(), path.display().to_string().cyan());
        }

        Ok(())
    }
}
