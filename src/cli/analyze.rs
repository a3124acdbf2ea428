//! Analyze command implementation

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::analyzer;
use crate::graph::ChunkGraph;

/// Print the runtime requirements of one or all chunks
#[derive(Args, Debug)]
pub struct AnalyzeCommand {
    /// Chunk graph JSON produced by the bundler
    #[arg(short, long)]
    pub graph: PathBuf,

    /// Only analyze this chunk
    #[arg(long)]
    pub chunk: Option<String>,
}

impl AnalyzeCommand {
    pub async fn execute(&self) -> Result<()> {
        info!("Loading chunk graph from {}", self.graph.display());
        let graph = ChunkGraph::load(&self.graph)?;

        let json = match &self.chunk {
            Some(chunk) => {
                let id = graph
                    .resolve_chunk_id(chunk)
                    .with_context(|| format!("Unknown chunk '{}'", chunk))?;
                let requirements = analyzer::analyze(&graph, id)
                    .with_context(|| format!("Unknown chunk '{}'", id))?;
                serde_json::to_string_pretty(&requirements)?
            }
            None => {
                let all: BTreeMap<String, _> = graph
                    .chunks
                    .iter()
                    .filter_map(|c| Some((c.id.to_string(), analyzer::analyze(&graph, &c.id)?)))
                    .collect();
                serde_json::to_string_pretty(&all)?
            }
        };

        println!("{}", json);

        Ok(())
    }
}
