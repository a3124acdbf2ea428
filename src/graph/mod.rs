//! Chunk graph data structures
//!
//! The chunk graph is produced by the bundler's chunking phase and read here
//! as JSON. It is the only input the requirement analyzer and the runtime
//! generator need.

mod chunk;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::{Placeholder, Template, TemplateError};

pub use chunk::{AsyncBlock, Chunk, ChunkGroup, ChunkGroupKind, ChunkId, ModuleId};

/// Ordering class of child chunk groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOrder {
    Prefetch,
    Preload,
}

/// The chunk graph of one compilation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkGraph {
    /// Build hash, if the build supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    pub chunks: Vec<Chunk>,

    #[serde(default)]
    pub groups: Vec<ChunkGroup>,

    #[serde(default)]
    pub blocks: Vec<AsyncBlock>,
}

impl ChunkGraph {
    /// Load a chunk graph from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read chunk graph: {}", path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Invalid chunk graph: {}", path.display()))
    }

    /// Parse and validate a chunk graph from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let graph: ChunkGraph = serde_json::from_str(json).context("Failed to parse chunk graph")?;
        graph.validate()?;
        Ok(graph)
    }

    /// Check referential integrity
    pub fn validate(&self) -> Result<()> {
        // Ids become object keys in the emitted runtime, so 7 and "7" collide
        let mut keys: HashMap<String, &ChunkId> = HashMap::new();
        for chunk in &self.chunks {
            if let Some(previous) = keys.insert(chunk.id.to_string(), &chunk.id) {
                if previous == &chunk.id {
                    anyhow::bail!("Duplicate chunk id '{}'", chunk.id);
                }
                anyhow::bail!("Chunk id '{}' is used both as a number and as a string", chunk.id);
            }
        }
        let chunk_ids: HashSet<&ChunkId> = keys.into_values().collect();

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                anyhow::bail!("Duplicate chunk group id '{}'", group.id);
            }
        }

        for group in &self.groups {
            for chunk in &group.chunks {
                if !chunk_ids.contains(chunk) {
                    anyhow::bail!("Chunk group '{}' references unknown chunk '{}'", group.id, chunk);
                }
            }
            for child in &group.children {
                if !group_ids.contains(child.as_str()) {
                    anyhow::bail!("Chunk group '{}' references unknown child group '{}'", group.id, child);
                }
            }
        }

        for block in &self.blocks {
            if !group_ids.contains(block.group.as_str()) {
                anyhow::bail!(
                    "Async block in module '{}' targets unknown chunk group '{}'",
                    block.module,
                    block.group
                );
            }
        }

        Ok(())
    }

    /// Get a chunk by id
    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.chunks.iter().find(|c| &c.id == id)
    }

    /// Find the graph's id for a chunk given in text form
    ///
    /// `"0"` finds a chunk whose id is either `0` or `"0"`.
    pub fn resolve_chunk_id(&self, key: &str) -> Option<&ChunkId> {
        self.chunks
            .iter()
            .map(|c| &c.id)
            .find(|id| id.to_string() == key)
    }

    /// Get a chunk group by id
    pub fn group(&self, id: &str) -> Option<&ChunkGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// All chunk groups containing the given chunk
    pub fn groups_of<'a>(&'a self, chunk: &'a ChunkId) -> impl Iterator<Item = &'a ChunkGroup> + 'a {
        self.groups.iter().filter(move |g| g.chunks.contains(chunk))
    }

    /// Chunks loaded together with the given chunk (its groups' chunks)
    pub fn initial_chunks(&self, chunk: &ChunkId) -> Vec<ChunkId> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        if seen.insert(chunk.clone()) {
            result.push(chunk.clone());
        }
        for group in self.groups_of(chunk) {
            for id in &group.chunks {
                if seen.insert(id.clone()) {
                    result.push(id.clone());
                }
            }
        }

        result
    }

    /// All chunks reachable through child groups that are not initial (BFS)
    pub fn async_chunks(&self, chunk: &ChunkId) -> Vec<ChunkId> {
        let initial: HashSet<ChunkId> = self.initial_chunks(chunk).into_iter().collect();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut seen_chunks = HashSet::new();
        let mut result = Vec::new();

        for group in self.groups_of(chunk) {
            for child in &group.children {
                if visited.insert(child.as_str()) {
                    queue.push_back(child.as_str());
                }
            }
        }

        while let Some(id) = queue.pop_front() {
            let Some(group) = self.group(id) else { continue };

            for chunk_id in &group.chunks {
                if !initial.contains(chunk_id) && seen_chunks.insert(chunk_id.clone()) {
                    result.push(chunk_id.clone());
                }
            }
            for child in &group.children {
                if visited.insert(child.as_str()) {
                    queue.push_back(child.as_str());
                }
            }
        }

        result
    }

    /// Chunks of direct child groups in the given ordering class, highest order first
    pub fn child_chunks_by_order(&self, chunk: &ChunkId, order: ChildOrder) -> Vec<ChunkId> {
        let mut children: Vec<(i32, &ChunkGroup)> = Vec::new();

        for group in self.groups_of(chunk) {
            for child_id in &group.children {
                let Some(child) = self.group(child_id) else { continue };
                let value = match order {
                    ChildOrder::Prefetch => child.prefetch_order,
                    ChildOrder::Preload => child.preload_order,
                };
                if let Some(value) = value {
                    if !children.iter().any(|(_, g)| g.id == child.id) {
                        children.push((value, child));
                    }
                }
            }
        }

        // Stable sort keeps declaration order for equal priorities
        children.sort_by(|a, b| b.0.cmp(&a.0));

        let mut seen = HashSet::new();
        children
            .into_iter()
            .flat_map(|(_, g)| g.chunks.iter())
            .filter(|id| *id != chunk && seen.insert((*id).clone()))
            .cloned()
            .collect()
    }

    /// Preload children of every chunk that has any
    pub fn preload_map(&self) -> HashMap<ChunkId, Vec<ChunkId>> {
        self.chunks
            .iter()
            .filter_map(|c| {
                let children = self.child_chunks_by_order(&c.id, ChildOrder::Preload);
                (!children.is_empty()).then(|| (c.id.clone(), children))
            })
            .collect()
    }

    /// Whether any module anywhere has an async block whose target group has chunks
    pub fn has_nonempty_async_blocks(&self) -> bool {
        self.blocks.iter().any(|block| {
            self.group(&block.group)
                .map(|g| !g.chunks.is_empty())
                .unwrap_or(false)
        })
    }

    /// Entry groups that contain the given chunk
    pub fn entry_groups_of<'a>(&'a self, chunk: &'a ChunkId) -> impl Iterator<Item = &'a ChunkGroup> + 'a {
        self.groups_of(chunk).filter(|g| g.is_entry())
    }

    /// Build hash: the explicit one, or a digest of the graph itself
    pub fn full_hash(&self) -> String {
        if let Some(hash) = &self.hash {
            return hash.clone();
        }
        let canonical = serde_json::to_string(self).unwrap_or_default();
        crate::utils::hash_content(canonical.as_bytes())
    }

    /// Filename of every chunk under the given template
    pub fn filenames(&self, template: &Template) -> Result<BTreeMap<ChunkId, String>, TemplateError> {
        let full_hash = self.full_hash();

        self.chunks
            .iter()
            .map(|chunk| {
                let filename = template.render(|p| match p {
                    Placeholder::Id => Some(chunk.id.to_string()),
                    Placeholder::Name => Some(chunk.display_name()),
                    Placeholder::ContentHash => Some(chunk.content_hash()),
                    Placeholder::FullHash => Some(full_hash.clone()),
                    Placeholder::Runtime => None,
                })?;
                Ok((chunk.id.clone(), filename))
            })
            .collect()
    }

    /// Total number of chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
