//! Hot update bootstrap
//!
//! The merger hands every raw delivery to an optional [`DeliveryExtension`]
//! before running hints, resolves and entries. [`HotUpdateBootstrap`] is the
//! extension used for hot module replacement: it tracks which chunks are
//! loaded, turns an update manifest into update-chunk addresses, and collects
//! the replacement factories of an update keyed by the build hash it applies to.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::delivery::ChunkDelivery;
use super::ModuleFactory;
use crate::config::Config;
use crate::graph::{ChunkId, ModuleId};
use crate::utils::{Placeholder, Template, TemplateError};

/// Observer of every raw delivery
pub trait DeliveryExtension: Send + Sync {
    fn on_delivery(&self, delivery: &ChunkDelivery);
}

/// Update manifest fetched from the entry address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// Updated chunks
    #[serde(rename = "c", default)]
    pub chunks: Vec<ChunkId>,

    /// Removed chunks
    #[serde(rename = "r", default)]
    pub removed_chunks: Vec<ChunkId>,

    /// Removed modules
    #[serde(rename = "m", default)]
    pub removed_modules: Vec<ModuleId>,
}

/// An update being collected
pub struct PendingUpdate {
    pub hash: String,
    pub manifest: UpdateManifest,
    pub modules: HashMap<ModuleId, ModuleFactory>,
    awaiting: HashSet<ChunkId>,
}

impl PendingUpdate {
    /// Whether every requested update chunk has arrived
    pub fn is_complete(&self) -> bool {
        self.awaiting.is_empty()
    }
}

impl std::fmt::Debug for PendingUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpdate")
            .field("hash", &self.hash)
            .field("manifest", &self.manifest)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("awaiting", &self.awaiting)
            .finish()
    }
}

struct HotState {
    current_hash: String,
    loaded_chunks: BTreeSet<ChunkId>,
    updates: HashMap<String, PendingUpdate>,
}

/// Hot update extension for the delivery path
pub struct HotUpdateBootstrap {
    public_path: String,
    runtime_name: String,
    chunk_template: Template,
    manifest_template: Template,
    previous: Option<Arc<dyn DeliveryExtension>>,
    state: Mutex<HotState>,
}

impl HotUpdateBootstrap {
    pub fn new(config: &Config, current_hash: String) -> Result<Self, TemplateError> {
        Ok(Self {
            public_path: config.output.public_path.clone(),
            runtime_name: config.hot.runtime.clone(),
            chunk_template: Template::parse(&config.hot.chunk_address_template)?,
            manifest_template: Template::parse(&config.hot.entry_address_template)?,
            previous: None,
            state: Mutex::new(HotState {
                current_hash,
                loaded_chunks: BTreeSet::new(),
                updates: HashMap::new(),
            }),
        })
    }

    /// Forward deliveries to an extension installed earlier
    pub fn chaining(mut self, previous: Arc<dyn DeliveryExtension>) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Chunks that were loaded before any delivery was observed
    pub fn with_loaded_chunks<I: IntoIterator<Item = ChunkId>>(self, chunks: I) -> Self {
        self.state.lock().loaded_chunks.extend(chunks);
        self
    }

    pub fn current_hash(&self) -> String {
        self.state.lock().current_hash.clone()
    }

    /// Address of the update manifest for the current build
    pub fn manifest_address(&self) -> Result<String, TemplateError> {
        let hash = self.current_hash();
        let path = self.manifest_template.render(|p| match p {
            Placeholder::FullHash => Some(hash.clone()),
            Placeholder::Runtime => Some(self.runtime_name.clone()),
            _ => None,
        })?;
        Ok(format!("{}{}", self.public_path, path))
    }

    /// Address of the update chunk for `chunk` against the current build
    pub fn chunk_address(&self, chunk: &ChunkId) -> Result<String, TemplateError> {
        let hash = self.current_hash();
        let path = self.chunk_template.render(|p| match p {
            Placeholder::Id => Some(chunk.to_string()),
            Placeholder::FullHash => Some(hash.clone()),
            Placeholder::Runtime => Some(self.runtime_name.clone()),
            _ => None,
        })?;
        Ok(format!("{}{}", self.public_path, path))
    }

    /// Start an update from a fetched manifest
    ///
    /// Returns the addresses of the update chunks to load: only chunks that
    /// are currently loaded get updated.
    pub fn apply_manifest(&self, json: &str) -> Result<Vec<String>> {
        let manifest: UpdateManifest =
            serde_json::from_str(json).context("Failed to parse hot update manifest")?;

        let (hash, awaiting) = {
            let state = self.state.lock();
            let awaiting: HashSet<ChunkId> = manifest
                .chunks
                .iter()
                .filter(|c| state.loaded_chunks.contains(*c))
                .cloned()
                .collect();
            (state.current_hash.clone(), awaiting)
        };

        let mut addresses = awaiting
            .iter()
            .map(|chunk| self.chunk_address(chunk))
            .collect::<Result<Vec<_>, _>>()?;
        addresses.sort();

        debug!(
            "Hot update from {}: {} chunk(s) to fetch",
            hash,
            addresses.len()
        );

        self.state.lock().updates.insert(
            hash.clone(),
            PendingUpdate {
                hash,
                manifest,
                modules: HashMap::new(),
                awaiting,
            },
        );

        Ok(addresses)
    }

    /// Host-visible callback invoked by an update chunk
    pub fn receive_update(&self, chunk: &ChunkId, modules: Vec<(ModuleId, ModuleFactory)>) {
        let mut state = self.state.lock();
        let hash = state.current_hash.clone();

        let Some(update) = state.updates.get_mut(&hash) else {
            warn!("Update chunk {} arrived with no update in progress", chunk);
            return;
        };

        update.modules.extend(modules);
        update.awaiting.remove(chunk);
    }

    /// Finish the update once all its chunks arrived and move to `next_hash`
    pub fn finish(&self, next_hash: &str) -> Option<PendingUpdate> {
        let mut state = self.state.lock();
        let hash = state.current_hash.clone();

        if !state.updates.get(&hash)?.is_complete() {
            return None;
        }

        let update = state.updates.remove(&hash)?;
        for chunk in &update.manifest.removed_chunks {
            state.loaded_chunks.remove(chunk);
        }
        state.current_hash = next_hash.to_string();

        debug!("Hot update {} -> {} ready", hash, next_hash);
        Some(update)
    }

    /// Whether an update against the current hash is in progress
    pub fn is_updating(&self) -> bool {
        let state = self.state.lock();
        state.updates.contains_key(&state.current_hash)
    }
}

impl DeliveryExtension for HotUpdateBootstrap {
    fn on_delivery(&self, delivery: &ChunkDelivery) {
        self.state
            .lock()
            .loaded_chunks
            .extend(delivery.chunk_ids.iter().cloned());

        if let Some(previous) = &self.previous {
            previous.on_delivery(delivery);
        }
    }
}
