//! Chunk loading runtime
//!
//! Execution-time model of the generated runtime: a per-chunk state store,
//! the async loader behind `ensure_chunk`, the load-completion merger, the
//! deferred entry scheduler, hint injection and the hot update extension
//! point. It drives an abstract [`Host`] and is what the emitted JavaScript
//! implements for browsers.
//!
//! Execution is cooperative: every state transition happens inside one call
//! (an `ensure_chunk`, a delivery, a host completion). Locks are never held
//! while calling out to the host, an extension or a module factory, so those
//! may re-enter the runtime.

mod delivery;
mod error;
mod hints;
mod host;
mod hot;
mod loader;
mod scheduler;
mod state;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::analyzer::{self, RuntimeRequirements};
use crate::config::{Config, LoadingMethod};
use crate::graph::{ChunkGraph, ChunkId, ModuleId};
use crate::utils::Template;

pub use delivery::{ChunkDelivery, DeliveryQueue};
pub use error::{ChunkLoadError, DeliveryCategory};
pub use hints::PreloadHandler;
pub use host::{HintKind, HintRequest, Host, ResourceCompletion, ResourceEvent, ResourceRequest};
pub use hot::{DeliveryExtension, HotUpdateBootstrap, PendingUpdate, UpdateManifest};
pub use loader::{ChunkHandler, HandlerRegistry, NoopHandler, ScriptHandler};
pub use scheduler::{DeferredEntry, DeferredScheduler};
pub use state::{ChunkFuture, ChunkResult, ChunkState, ChunkStateKind, ChunkStateStore, LoadHandle};

/// Executable definition of a module
pub type ModuleFactory = Arc<dyn Fn(&Runtime) + Send + Sync>;

/// Maps a chunk id to its filename
pub type AddressFn = Arc<dyn Fn(&ChunkId) -> String + Send + Sync>;

/// Receives load failures nobody else handled
pub type ErrorSink = Arc<dyn Fn(&ChunkLoadError) + Send + Sync>;

/// Resource attributes used for every injected load and hint
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Prefix for every chunk address
    pub public_path: String,

    /// Chunk id to filename mapping supplied by the build
    pub chunk_filename: AddressFn,

    /// Timeout for each load attempt
    pub timeout: Duration,

    pub nonce: Option<String>,
    pub cross_origin: Option<String>,
    pub resource_type: Option<String>,
}

impl RuntimeOptions {
    /// Options for the given config, with filenames taken from the graph
    pub fn from_config(config: &Config, graph: &ChunkGraph) -> Result<Self> {
        let template = Template::parse(&config.output.chunk_filename)?;
        let filenames = graph.filenames(&template)?;

        Ok(Self {
            public_path: config.output.public_path.clone(),
            chunk_filename: Arc::new(move |id: &ChunkId| {
                filenames
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("{}.js", id))
            }),
            timeout: config.load_timeout(),
            nonce: config.loading.nonce.clone(),
            cross_origin: config.loading.cross_origin.clone(),
            resource_type: config.loading.resource_type.clone(),
        })
    }

    /// Full address of a chunk
    pub fn address(&self, chunk: &ChunkId) -> String {
        format!("{}{}", self.public_path, (self.chunk_filename)(chunk))
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            public_path: "/".to_string(),
            chunk_filename: Arc::new(|id: &ChunkId| format!("{}.js", id)),
            timeout: Duration::from_secs(120),
            nonce: None,
            cross_origin: None,
            resource_type: None,
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("public_path", &self.public_path)
            .field("timeout", &self.timeout)
            .field("nonce", &self.nonce)
            .field("cross_origin", &self.cross_origin)
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

pub(crate) struct RuntimeInner {
    store: Mutex<ChunkStateStore>,
    scheduler: Option<Mutex<DeferredScheduler>>,
    handlers: HandlerRegistry,
    on_demand: bool,
    prefetch: bool,
    host: Arc<dyn Host>,
    options: RuntimeOptions,
    extension: RwLock<Option<Arc<dyn DeliveryExtension>>>,
    error_sink: RwLock<ErrorSink>,
}

/// One runtime instance per loaded build
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Start configuring a runtime for the given host
    pub fn builder(host: Arc<dyn Host>) -> RuntimeBuilder {
        RuntimeBuilder::new(host)
    }

    /// Current state of a chunk
    pub fn state(&self, chunk: &ChunkId) -> ChunkStateKind {
        self.inner.store.lock().kind(chunk)
    }

    /// Whether a module factory has been merged
    pub fn has_module(&self, module: &ModuleId) -> bool {
        self.inner.store.lock().has_module(module)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub(crate) fn same_as(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run a module's factory
    pub fn execute(&self, module: &ModuleId) -> ChunkResult {
        let factory = self.inner.store.lock().factory(module);
        match factory {
            Some(factory) => {
                debug!("Executing module {}", module);
                factory(self);
                Ok(())
            }
            None => Err(ChunkLoadError::invariant(format!(
                "module {} has no factory",
                module
            ))),
        }
    }

    /// Load the given chunks, then execute `module`
    ///
    /// Failures are passed to the error sink before being returned.
    pub async fn import(&self, chunks: &[ChunkId], module: &ModuleId) -> ChunkResult {
        let loads: Vec<_> = chunks.iter().map(|c| self.ensure_chunk(c)).collect();

        let result = match future::try_join_all(loads).await {
            Ok(_) => self.execute(module),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            self.report(err);
        }

        result
    }

    /// Install or clear the delivery extension, returning the previous one
    pub fn set_extension(
        &self,
        extension: Option<Arc<dyn DeliveryExtension>>,
    ) -> Option<Arc<dyn DeliveryExtension>> {
        std::mem::replace(&mut *self.inner.extension.write(), extension)
    }

    /// Replace the sink for unhandled load failures
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.inner.error_sink.write() = sink;
    }

    /// Hand an unhandled failure to the error sink
    pub fn report(&self, err: &ChunkLoadError) {
        let sink = self.inner.error_sink.read().clone();
        sink(err);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.inner.options)
            .field("handlers", &self.inner.handlers.len())
            .finish()
    }
}

/// Builder for [`Runtime`]
pub struct RuntimeBuilder {
    host: Arc<dyn Host>,
    options: RuntimeOptions,
    handlers: Vec<Arc<dyn ChunkHandler>>,
    on_demand: bool,
    script_loading: bool,
    noop_loading: bool,
    entry_deferral: bool,
    prefetch: bool,
    initial_chunks: Vec<ChunkId>,
    preload: HashMap<ChunkId, Vec<ChunkId>>,
    extension: Option<Arc<dyn DeliveryExtension>>,
    error_sink: Option<ErrorSink>,
}

impl RuntimeBuilder {
    fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            options: RuntimeOptions::default(),
            handlers: Vec::new(),
            on_demand: true,
            script_loading: true,
            noop_loading: false,
            entry_deferral: true,
            prefetch: true,
            initial_chunks: Vec::new(),
            preload: HashMap::new(),
            extension: None,
            error_sink: None,
        }
    }

    /// Configure the runtime the way the generator would for `chunk`
    pub fn for_chunk(host: Arc<dyn Host>, config: &Config, graph: &ChunkGraph, chunk: &ChunkId) -> Result<Self> {
        let chunk = graph
            .resolve_chunk_id(&chunk.to_string())
            .ok_or_else(|| anyhow::anyhow!("Unknown chunk '{}'", chunk))?;
        let requirements: RuntimeRequirements = analyzer::analyze(graph, chunk)
            .ok_or_else(|| anyhow::anyhow!("Unknown chunk '{}'", chunk))?;

        if requirements.needs_on_demand_loading && config.loading.method == LoadingMethod::None {
            return Err(ChunkLoadError::invariant(format!(
                "chunk {} needs on-demand loading but loading.method is \"none\"",
                chunk
            ))
            .into());
        }

        let mut builder = Self::new(host)
            .options(RuntimeOptions::from_config(config, graph)?)
            .on_demand(requirements.needs_on_demand_loading)
            .script_loading(!requirements.is_noop_loading())
            .noop_loading(requirements.is_noop_loading())
            .entry_deferral(analyzer::build_needs_entry_deferral(graph))
            .prefetch(requirements.needs_prefetch_support)
            .initial_chunks([chunk.clone()])
            .preload_map(graph.preload_map());

        if config.hot.enabled && requirements.needs_chunk_loading_code {
            let hot = HotUpdateBootstrap::new(config, graph.full_hash())?
                .with_loaded_chunks([chunk.clone()]);
            builder = builder.extension(Arc::new(hot));
        }

        Ok(builder)
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Register an additional delivery mechanism
    pub fn handler(mut self, handler: Arc<dyn ChunkHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Whether `ensure_chunk` exists at all
    pub fn on_demand(mut self, enabled: bool) -> Self {
        self.on_demand = enabled;
        self
    }

    /// Whether the built-in script handler is registered
    pub fn script_loading(mut self, enabled: bool) -> Self {
        self.script_loading = enabled;
        self
    }

    /// Resolve every chunk without loading anything when script loading is off
    pub fn noop_loading(mut self, enabled: bool) -> Self {
        self.noop_loading = enabled;
        self
    }

    pub fn entry_deferral(mut self, enabled: bool) -> Self {
        self.entry_deferral = enabled;
        self
    }

    pub fn prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    /// Chunks that shipped with the runtime and start out loaded
    pub fn initial_chunks<I: IntoIterator<Item = ChunkId>>(mut self, chunks: I) -> Self {
        self.initial_chunks.extend(chunks);
        self
    }

    /// Preload children to hint whenever a chunk is ensured
    pub fn preload_map(mut self, preload: HashMap<ChunkId, Vec<ChunkId>>) -> Self {
        self.preload = preload;
        self
    }

    pub fn extension(mut self, extension: Arc<dyn DeliveryExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Build the runtime
    ///
    /// On-demand loading without any handler is a build invariant violation.
    pub fn build(self) -> Result<Runtime, ChunkLoadError> {
        let mut registry = HandlerRegistry::new();

        if self.on_demand {
            if self.script_loading {
                registry.register(Arc::new(ScriptHandler::all()));
            } else if self.noop_loading {
                registry.register(Arc::new(NoopHandler));
            }
            if !self.preload.is_empty() {
                registry.register(Arc::new(PreloadHandler::new(self.preload)));
            }
        }
        for handler in self.handlers {
            registry.register(handler);
        }

        if self.on_demand && registry.is_empty() {
            return Err(ChunkLoadError::invariant(
                "on-demand loading requested without any chunk handler",
            ));
        }

        let mut store = ChunkStateStore::new();
        for chunk in &self.initial_chunks {
            store.mark_initial(chunk);
        }

        let error_sink = self.error_sink.unwrap_or_else(|| {
            let sink: ErrorSink =
                Arc::new(|err: &ChunkLoadError| error!("Unhandled chunk load failure: {}", err));
            sink
        });

        debug!(
            "Runtime built with {} handler(s), deferral={}, prefetch={}",
            registry.len(),
            self.entry_deferral,
            self.prefetch
        );

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                store: Mutex::new(store),
                scheduler: self
                    .entry_deferral
                    .then(|| Mutex::new(DeferredScheduler::new())),
                handlers: registry,
                on_demand: self.on_demand,
                prefetch: self.prefetch,
                host: self.host,
                options: self.options,
                extension: RwLock::new(self.extension),
                error_sink: RwLock::new(error_sink),
            }),
        })
    }
}

pub(crate) fn not_on_demand(chunk: &ChunkId) -> BoxFuture<'static, ChunkResult> {
    future::ready(Err(ChunkLoadError::invariant(format!(
        "ensure_chunk({}) on a runtime built without on-demand loading",
        chunk
    ))))
    .boxed()
}
