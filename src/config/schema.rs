//! Configuration schema definitions

use serde::{Deserialize, Serialize};

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Public URL prefix for chunk addresses
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Filename template for on-demand chunks
    #[serde(default = "default_chunk_filename")]
    pub chunk_filename: String,

    /// Host-global object holding the delivery array
    #[serde(default = "default_global_namespace")]
    pub global_namespace: String,

    /// Name of the array chunk artifacts push deliveries into
    #[serde(default = "default_delivery_array")]
    pub delivery_array: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            public_path: default_public_path(),
            chunk_filename: default_chunk_filename(),
            global_namespace: default_global_namespace(),
            delivery_array: default_delivery_array(),
        }
    }
}

fn default_public_path() -> String {
    "/".to_string()
}

fn default_chunk_filename() -> String {
    "[name].[contenthash:8].js".to_string()
}

fn default_global_namespace() -> String {
    "self".to_string()
}

fn default_delivery_array() -> String {
    "chunkwiseChunks".to_string()
}

/// Delivery mechanism compiled into the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMethod {
    /// Script elements whose code pushes into the delivery array
    Jsonp,
    /// No on-demand loading
    None,
}

/// Chunk loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingConfig {
    #[serde(default = "default_loading_method")]
    pub method: LoadingMethod,

    /// Timeout for in-flight loads, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cross-origin attribute for injected scripts and hints
    #[serde(default)]
    pub cross_origin: Option<String>,

    /// Type attribute for injected scripts
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Nonce attribute for injected scripts and hints
    #[serde(default)]
    pub nonce: Option<String>,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            method: default_loading_method(),
            timeout_ms: default_timeout_ms(),
            cross_origin: None,
            resource_type: None,
            nonce: None,
        }
    }
}

fn default_loading_method() -> LoadingMethod {
    LoadingMethod::Jsonp
}

fn default_timeout_ms() -> u64 {
    120_000
}

/// Hot update bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotConfig {
    /// Emit the hot update bootstrap
    #[serde(default)]
    pub enabled: bool,

    /// Address template for update chunks
    #[serde(default = "default_hot_chunk_template")]
    pub chunk_address_template: String,

    /// Address template for the update manifest
    #[serde(default = "default_hot_entry_template")]
    pub entry_address_template: String,

    /// Host-global callback that update chunks call
    #[serde(default = "default_hot_global")]
    pub global: String,

    /// Runtime name substituted for `[runtime]`
    #[serde(default = "default_runtime_name")]
    pub runtime: String,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_address_template: default_hot_chunk_template(),
            entry_address_template: default_hot_entry_template(),
            global: default_hot_global(),
            runtime: default_runtime_name(),
        }
    }
}

fn default_hot_chunk_template() -> String {
    "[id].[fullhash].hot-update.js".to_string()
}

fn default_hot_entry_template() -> String {
    "[runtime].[fullhash].hot-update.json".to_string()
}

fn default_hot_global() -> String {
    "chunkwiseHotUpdate".to_string()
}

fn default_runtime_name() -> String {
    "main".to_string()
}
