//! Configuration handling for Chunkwise
//!
//! Parses and manages chunkwise.toml configuration files.

mod schema;

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::{is_js_identifier, Placeholder, Template};

pub use schema::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Output naming and delivery globals
    #[serde(default)]
    pub output: OutputConfig,

    /// Chunk loading settings
    #[serde(default)]
    pub loading: LoadingConfig,

    /// Hot update bootstrap settings
    #[serde(default)]
    pub hot: HotConfig,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    /// Load the file if it exists, otherwise use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default_config())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse chunkwise.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            output: OutputConfig::default(),
            loading: LoadingConfig::default(),
            hot: HotConfig::default(),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.loading.timeout_ms == 0 {
            anyhow::bail!("loading.timeout_ms must be greater than zero");
        }

        for (key, name) in [
            ("output.global_namespace", &self.output.global_namespace),
            ("output.delivery_array", &self.output.delivery_array),
            ("hot.global", &self.hot.global),
        ] {
            if !is_js_identifier(name) {
                anyhow::bail!("{} must be a JavaScript identifier, got '{}'", key, name);
            }
        }

        Template::parse(&self.output.chunk_filename)
            .context("Invalid output.chunk_filename")?;

        let chunk_template = Template::parse(&self.hot.chunk_address_template)
            .context("Invalid hot.chunk_address_template")?;
        if !chunk_template.contains(Placeholder::Id) {
            anyhow::bail!("hot.chunk_address_template must contain [id]");
        }

        let entry_template = Template::parse(&self.hot.entry_address_template)
            .context("Invalid hot.entry_address_template")?;

        for (key, template) in [
            ("hot.chunk_address_template", &chunk_template),
            ("hot.entry_address_template", &entry_template),
        ] {
            if !template.contains(Placeholder::FullHash) {
                anyhow::bail!("{} must contain [fullhash]", key);
            }
        }

        Ok(())
    }

    /// Load timeout as a duration
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.loading.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_file() {
        let config = Config::from_toml("[project]\nname = \"app\"\n").unwrap();

        assert_eq!(config.project.version, "0.1.0");
        assert_eq!(config.output.global_namespace, "self");
        assert_eq!(config.output.delivery_array, "chunkwiseChunks");
        assert_eq!(config.loading.method, LoadingMethod::Jsonp);
        assert_eq!(config.load_timeout(), Duration::from_secs(120));
        assert!(!config.hot.enabled);
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [project]
            name = "app"

            [output]
            public_path = "/static/"
            delivery_array = "appChunks"

            [loading]
            method = "none"
            timeout_ms = 500
            cross_origin = "anonymous"
            resource_type = "module"

            [hot]
            enabled = true
            runtime = "webapp"
            "#,
        )
        .unwrap();

        assert_eq!(config.output.public_path, "/static/");
        assert_eq!(config.loading.method, LoadingMethod::None);
        assert_eq!(config.loading.cross_origin.as_deref(), Some("anonymous"));
        assert_eq!(config.hot.runtime, "webapp");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = Config::from_toml("[project]\nname = \"a\"\n[loading]\ntimeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));

        let err = Config::from_toml("[project]\nname = \"a\"\n[output]\ndelivery_array = \"a-b\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("output.delivery_array"));

        let err = Config::from_toml(
            "[project]\nname = \"a\"\n[hot]\nchunk_address_template = \"[fullhash].js\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("[id]"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("chunkwise.toml")).unwrap();
        assert_eq!(config.project.name, "my-app");
    }
}
