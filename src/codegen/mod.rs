//! Runtime code generation
//!
//! Emits the JavaScript chunk loading runtime for one chunk. The analyzer
//! decides which features the chunk needs; every section below is only
//! written when one of those features asks for it, so a chunk that needs
//! nothing gets an empty runtime.
//!
//! The emitted runtime has the same shape as [`crate::runtime`]: an installed
//! chunk table (`undefined` not requested, `null` hinted, `[resolve, reject,
//! promise]` loading, `0` loaded), an `ensureChunk` aggregate over a handler
//! object, a merger fed through the delivery array, the deferred entry
//! scheduler, hint functions and the hot update bootstrap.

mod hints;
mod hot;
mod loading;
mod merger;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::analyzer::{self, RuntimeRequirements};
use crate::config::{Config, LoadingMethod};
use crate::graph::{ChunkGraph, ChunkId};
use crate::utils::TemplateError;

/// Errors raised while generating a runtime
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Unknown chunk '{0}'")]
    UnknownChunk(ChunkId),

    #[error(
        "Chunk {chunk} needs on-demand loading but no chunk loading handler is enabled (loading.method = \"none\")"
    )]
    NoChunkLoadingHandler { chunk: ChunkId },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Runtime emitted for one chunk
#[derive(Debug, Clone)]
pub struct GeneratedRuntime {
    pub chunk: ChunkId,
    pub requirements: RuntimeRequirements,
    pub code: String,
}

impl GeneratedRuntime {
    /// True when the chunk needs no runtime at all
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }
}

/// Sections to emit for one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Features {
    /// Bootstrap, installed chunk table and the delivery merger
    pub merger: bool,
    /// `ensureChunk` aggregate and script handler
    pub loading: bool,
    /// Script handler in its no-op form
    pub noop_loading: bool,
    /// Script injection function `l`
    pub script_loader: bool,
    /// Chunk filename map `u`
    pub filenames: bool,
    pub prefetch: bool,
    pub preload: bool,
    /// Deferred entry scheduler `O`
    pub deferral: bool,
    pub hot: bool,
}

/// Everything a section needs to render itself
pub(crate) struct Context<'a> {
    pub config: &'a Config,
    pub graph: &'a ChunkGraph,
    pub chunk: &'a ChunkId,
    pub features: Features,
    /// Preload children of this chunk and of the chunks it loads
    pub preloads: BTreeMap<String, Vec<ChunkId>>,
}

/// Generates per-chunk runtimes for one compilation
pub struct RuntimeGenerator {
    config: Arc<Config>,
    graph: ChunkGraph,
    build_deferral: bool,
}

impl RuntimeGenerator {
    pub fn new(config: Arc<Config>, graph: ChunkGraph) -> Self {
        let build_deferral = analyzer::build_needs_entry_deferral(&graph);
        Self {
            config,
            graph,
            build_deferral,
        }
    }

    pub fn graph(&self) -> &ChunkGraph {
        &self.graph
    }

    /// Generate the runtime for `chunk`
    pub fn generate(&self, chunk: &ChunkId) -> Result<GeneratedRuntime, GenerateError> {
        let chunk = self
            .graph
            .resolve_chunk_id(&chunk.to_string())
            .ok_or_else(|| GenerateError::UnknownChunk(chunk.clone()))?;
        let requirements = analyzer::analyze(&self.graph, chunk)
            .ok_or_else(|| GenerateError::UnknownChunk(chunk.clone()))?;

        if requirements.needs_on_demand_loading && self.config.loading.method == LoadingMethod::None {
            return Err(GenerateError::NoChunkLoadingHandler {
                chunk: chunk.clone(),
            });
        }

        let preloads = self.preloads_for(chunk);
        let features = self.features(&requirements, !preloads.is_empty());
        debug!("Runtime features for chunk {}: {:?}", chunk, features);

        let ctx = Context {
            config: &self.config,
            graph: &self.graph,
            chunk,
            features,
            preloads,
        };

        let code = if features.merger { render(&ctx)? } else { String::new() };

        info!("Generated runtime for chunk {} ({} bytes)", chunk, code.len());

        Ok(GeneratedRuntime {
            chunk: chunk.clone(),
            requirements,
            code,
        })
    }

    /// Generate the runtime of every chunk in the graph
    pub fn generate_all(&self) -> Result<Vec<GeneratedRuntime>, GenerateError> {
        self.graph
            .chunks
            .iter()
            .map(|c| self.generate(&c.id))
            .collect()
    }

    fn features(&self, req: &RuntimeRequirements, has_preloads: bool) -> Features {
        let loading = req.needs_on_demand_loading;
        let noop_loading = req.is_noop_loading();
        let full_loading = loading && !noop_loading;
        let hot = self.config.hot.enabled && req.needs_chunk_loading_code;
        let preload = full_loading && has_preloads;

        Features {
            merger: !req.is_empty() || self.build_deferral,
            loading,
            noop_loading,
            script_loader: full_loading || hot,
            filenames: full_loading || req.needs_prefetch_support || preload,
            prefetch: req.needs_prefetch_support,
            preload,
            deferral: self.build_deferral,
            hot,
        }
    }

    fn preloads_for(&self, chunk: &ChunkId) -> BTreeMap<String, Vec<ChunkId>> {
        let map = self.graph.preload_map();
        std::iter::once(chunk.clone())
            .chain(self.graph.async_chunks(chunk))
            .filter_map(|id| {
                let children = map.get(&id)?;
                Some((id.to_string(), children.clone()))
            })
            .collect()
    }
}

/// JSON text of a serializable value, used for every literal in emitted code
pub(crate) fn js_value<T: Serialize>(value: &T) -> String {
    serde_json::json!(value).to_string()
}

const BOOTSTRAP: &str = r#"  var __chunkwise_modules__ = {};
  var __chunkwise_cache__ = {};

  function __chunkwise_require__(moduleId) {
    var cached = __chunkwise_cache__[moduleId];
    if (cached !== undefined) return cached.exports;
    var factory = __chunkwise_modules__[moduleId];
    if (!factory) {
      var error = new Error("Cannot find module '" + moduleId + "'");
      error.code = "MODULE_NOT_FOUND";
      throw error;
    }
    var module = (__chunkwise_cache__[moduleId] = { exports: {} });
    factory(module, module.exports, __chunkwise_require__);
    return module.exports;
  }

  __chunkwise_require__.m = __chunkwise_modules__;
  __chunkwise_require__.c = __chunkwise_cache__;
  __chunkwise_require__.o = (obj, prop) => Object.prototype.hasOwnProperty.call(obj, prop);
"#;

fn render(ctx: &Context) -> Result<String, GenerateError> {
    let features = ctx.features;
    let mut code = String::new();

    code.push_str(&format!(
        "// chunkwise runtime for chunk {} (build {})\n(() => {{\n",
        ctx.chunk.to_js(),
        ctx.graph.full_hash()
    ));
    code.push_str(BOOTSTRAP);

    if features.script_loader || features.filenames {
        code.push('\n');
        code.push_str(&loading::resource_options(ctx));
    }

    code.push('\n');
    code.push_str(&loading::installed_chunks(ctx));

    if features.loading {
        code.push('\n');
        code.push_str(loading::ENSURE_CHUNK);
    }
    if features.filenames {
        code.push('\n');
        code.push_str(&loading::filename_map(ctx)?);
    }
    if features.script_loader {
        code.push('\n');
        code.push_str(loading::SCRIPT_LOADER);
    }
    if features.loading {
        code.push('\n');
        code.push_str(if features.noop_loading {
            loading::NOOP_HANDLER
        } else {
            loading::SCRIPT_HANDLER
        });
    }

    if features.prefetch || features.preload {
        code.push('\n');
        code.push_str(&hints::render(ctx));
    }

    if features.deferral {
        code.push('\n');
        code.push_str(merger::SCHEDULER);
    }

    if features.hot {
        code.push('\n');
        code.push_str(&hot::render(ctx)?);
    }

    code.push('\n');
    code.push_str(&merger::render(ctx));

    code.push('\n');
    code.push_str(&merger::startup(ctx));

    code.push_str("})();\n");

    Ok(code)
}
