//! Chunk, chunk group and id types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(untagged)]
        pub enum $name {
            Number(u64),
            Name(String),
        }

        impl $name {
            /// Render as a JavaScript literal (number or quoted string)
            pub fn to_js(&self) -> String {
                match self {
                    Self::Number(n) => n.to_string(),
                    Self::Name(s) => serde_json::Value::String(s.clone()).to_string(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Number(n) => write!(f, "{}", n),
                    Self::Name(s) => f.write_str(s),
                }
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(match s.parse::<u64>() {
                    Ok(n) => Self::Number(n),
                    Err(_) => Self::Name(s.to_string()),
                })
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::Name(s.to_string())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self::Number(n)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a chunk, stable within one compilation
    ChunkId
);

opaque_id!(
    /// Identifier of a module, unique within the whole build
    ModuleId
);

/// A deliverable unit of bundled code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,

    /// Chunk name (used for output filename)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Modules included in this chunk
    #[serde(default)]
    pub modules: Vec<ModuleId>,

    /// Content hash computed by the build, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, modules: Vec<ModuleId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            modules,
            hash: None,
        }
    }

    /// Name used in filename templates, falling back to the id
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Content hash, derived from the module list when the build did not supply one
    pub fn content_hash(&self) -> String {
        match &self.hash {
            Some(hash) => hash.clone(),
            None => {
                let ids: Vec<String> = self.modules.iter().map(|m| m.to_string()).collect();
                crate::utils::hash_content(ids.join("\n").as_bytes())
            }
        }
    }
}

/// Kind of chunk group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkGroupKind {
    /// Entry point group - loaded at startup
    Entry,
    /// Group created by a dynamic split point
    Async,
}

/// A set of chunks produced together for one split point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGroup {
    pub id: String,

    pub kind: ChunkGroupKind,

    /// Chunks of this group, in load order
    pub chunks: Vec<ChunkId>,

    /// Child groups (split points reachable from this group)
    #[serde(default)]
    pub children: Vec<String>,

    /// Entry module, for entry groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_module: Option<ModuleId>,

    /// Set when this group should be prefetched by its parents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_order: Option<i32>,

    /// Set when this group should be preloaded alongside its parents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_order: Option<i32>,
}

impl ChunkGroup {
    pub fn is_entry(&self) -> bool {
        self.kind == ChunkGroupKind::Entry
    }
}

/// An asynchronous dependency block inside a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncBlock {
    /// Module containing the block
    pub module: ModuleId,

    /// Chunk group loaded by the block
    pub group: String,
}
