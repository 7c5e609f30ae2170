//! Configuration document loading.
//!
//! Configuration is a JSON document; every recognized key has an
//! upper-cased environment variable counterpart, and non-empty
//! environment values win over the file. Scalar overrides are parsed
//! directly; list/object overrides are parsed as JSON.

use crate::error::{Error, Result};
use crate::groups::AuthGroup;
use crate::types::{TypeDefinition, TypeRegistry};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size for bulk index building
    pub batch_size: usize,
    /// Cap on batches per eager build; 0 = unbounded
    pub max_batches: usize,
    /// If true, updates rebuild documents; otherwise they invalidate the
    /// affected indexes
    pub automatic_index_updates: bool,
    /// Group combinations to pre-build at startup
    pub eager_indexing_groups: Vec<Vec<AuthGroup>>,
    /// Group patterns that must never be considered
    pub ignored_allowed_groups: Vec<AuthGroup>,
    /// Filesystem root for attachment resolution
    pub attachments_path_base: String,
    /// Write the index registry to the RDF store
    pub persist_indexes: bool,
    /// Engine-specific index settings template
    pub default_settings: Option<serde_json::Value>,
    /// Document type definitions
    pub types: Vec<TypeDefinition>,
    /// Debounce interval for the update queue, in minutes
    pub update_wait_interval_minutes: u64,
    /// Size of the update worker pool
    pub number_of_threads: usize,
    /// Expose the raw query endpoint
    pub enable_raw_dsl_endpoint: bool,
    /// VALUES slice size for discovery queries
    pub delta_batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            batch_size: 100,
            max_batches: 0,
            automatic_index_updates: true,
            eager_indexing_groups: Vec::new(),
            ignored_allowed_groups: Vec::new(),
            attachments_path_base: "/share/".to_string(),
            persist_indexes: true,
            default_settings: None,
            types: Vec::new(),
            update_wait_interval_minutes: 1,
            number_of_threads: 2,
            enable_raw_dsl_endpoint: false,
            delta_batch_size: 100,
        }
    }
}

impl SearchConfig {
    /// Load a configuration file, apply environment overrides, and
    /// validate the type definitions.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read config {}: {}", path.display(), e)))?;
        let mut config: SearchConfig = serde_json::from_str(&contents)?;
        config.apply_env_overrides()?;
        // Surface type definition problems at boot rather than first use
        config.type_registry()?;
        Ok(config)
    }

    /// Validate the type definitions and build the lookup registry.
    pub fn type_registry(&self) -> Result<TypeRegistry> {
        TypeRegistry::new(self.types.clone())
    }

    /// The update queue debounce interval.
    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.update_wait_interval_minutes * 60)
    }

    /// Apply upper-cased environment overrides. Non-empty values win.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_nonempty("BATCH_SIZE") {
            self.batch_size = parse_scalar("BATCH_SIZE", &v)?;
        }
        if let Some(v) = env_nonempty("MAX_BATCHES") {
            self.max_batches = parse_scalar("MAX_BATCHES", &v)?;
        }
        if let Some(v) = env_nonempty("AUTOMATIC_INDEX_UPDATES") {
            self.automatic_index_updates = parse_bool("AUTOMATIC_INDEX_UPDATES", &v)?;
        }
        if let Some(v) = env_nonempty("EAGER_INDEXING_GROUPS") {
            self.eager_indexing_groups = parse_json("EAGER_INDEXING_GROUPS", &v)?;
        }
        if let Some(v) = env_nonempty("IGNORED_ALLOWED_GROUPS") {
            self.ignored_allowed_groups = parse_json("IGNORED_ALLOWED_GROUPS", &v)?;
        }
        if let Some(v) = env_nonempty("ATTACHMENTS_PATH_BASE") {
            self.attachments_path_base = v;
        }
        if let Some(v) = env_nonempty("PERSIST_INDEXES") {
            self.persist_indexes = parse_bool("PERSIST_INDEXES", &v)?;
        }
        if let Some(v) = env_nonempty("DEFAULT_SETTINGS") {
            self.default_settings = Some(parse_json("DEFAULT_SETTINGS", &v)?);
        }
        if let Some(v) = env_nonempty("TYPES") {
            self.types = parse_json("TYPES", &v)?;
        }
        if let Some(v) = env_nonempty("UPDATE_WAIT_INTERVAL_MINUTES") {
            self.update_wait_interval_minutes = parse_scalar("UPDATE_WAIT_INTERVAL_MINUTES", &v)?;
        }
        if let Some(v) = env_nonempty("NUMBER_OF_THREADS") {
            self.number_of_threads = parse_scalar("NUMBER_OF_THREADS", &v)?;
        }
        if let Some(v) = env_nonempty("ENABLE_RAW_DSL_ENDPOINT") {
            self.enable_raw_dsl_endpoint = parse_bool("ENABLE_RAW_DSL_ENDPOINT", &v)?;
        }
        if let Some(v) = env_nonempty("DELTA_BATCH_SIZE") {
            self.delta_batch_size = parse_scalar("DELTA_BATCH_SIZE", &v)?;
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_scalar<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("invalid value for {}: '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "invalid boolean for {}: '{}'",
            key, value
        ))),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::config(format!("invalid JSON for {}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.delta_batch_size, 100);
        assert_eq!(config.number_of_threads, 2);
        assert_eq!(config.wait_interval(), Duration::from_secs(60));
        assert!(config.automatic_index_updates);
        assert!(config.persist_indexes);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "batch_size": 50,
                "delta_batch_size": 10,
                "update_wait_interval_minutes": 5,
                "types": [{{
                    "name": "session",
                    "on_path": "sessions",
                    "rdf_types": ["http://example.org/Session"],
                    "properties": [{{"name": "title", "path": "http://example.org/title"}}]
                }}]
            }}"#
        )
        .unwrap();

        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.delta_batch_size, 10);
        assert_eq!(config.wait_interval(), Duration::from_secs(300));
        assert_eq!(config.types.len(), 1);
    }

    #[test]
    fn test_load_rejects_invalid_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // Non-composite type without rdf_types
        write!(
            file,
            r#"{{"types": [{{"name": "broken", "on_path": "broken"}}]}}"#
        )
        .unwrap();
        assert!(SearchConfig::load(file.path()).is_err());
    }

    // One test mutates the process environment; splitting it would race
    // under the parallel test runner.
    #[test]
    fn test_env_overrides() {
        std::env::set_var("DELTA_BATCH_SIZE", "25");
        std::env::set_var("AUTOMATIC_INDEX_UPDATES", "false");
        std::env::set_var(
            "IGNORED_ALLOWED_GROUPS",
            r#"[{"name": "clean", "variables": []}]"#,
        );

        let mut config = SearchConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.delta_batch_size, 25);
        assert!(!config.automatic_index_updates);
        assert_eq!(config.ignored_allowed_groups.len(), 1);

        std::env::set_var("NUMBER_OF_THREADS", "many");
        assert!(config.apply_env_overrides().is_err());

        std::env::remove_var("DELTA_BATCH_SIZE");
        std::env::remove_var("AUTOMATIC_INDEX_UPDATES");
        std::env::remove_var("IGNORED_ALLOWED_GROUPS");
        std::env::remove_var("NUMBER_OF_THREADS");
    }
}
