use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};
use crate::types::DataReference;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Executor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Failure messages longer than this are trimmed before they are stored.
    #[serde(default = "default_max_error_message_length")]
    pub max_error_message_length: usize,
    /// Retries for nodes that do not declare their own.
    #[serde(default)]
    pub default_max_retries: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_error_message_length: default_max_error_message_length(),
            default_max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Prefix under which every execution stores its data.
    #[serde(default = "default_data_root")]
    pub data_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
        }
    }
}

impl StorageConfig {
    pub fn data_root(&self) -> DataReference {
        DataReference::new(self.data_root.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// When false the no-op catalog is used.
    #[serde(default = "default_catalog_enabled")]
    pub enabled: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: default_catalog_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_max_error_message_length() -> usize { 10240 }
fn default_data_root() -> String { "mem://skein".to_string() }
fn default_catalog_enabled() -> bool { true }
fn default_event_capacity() -> usize { 256 }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SkeinError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| SkeinError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_error_message_length, 10240);
        assert_eq!(config.engine.default_max_retries, 0);
        assert_eq!(config.storage.data_root, "mem://skein");
        assert!(config.catalog.enabled);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[engine]
default_max_retries = 2

[catalog]
enabled = false
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default_max_retries, 2);
        assert_eq!(config.engine.max_error_message_length, 10240);
        assert!(!config.catalog.enabled);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("SKEIN_TEST_DATA_ROOT", "mem://from-env");
        let out = expand_env_vars("data_root = \"${SKEIN_TEST_DATA_ROOT}\"");
        assert_eq!(out, "data_root = \"mem://from-env\"");
    }

    #[test]
    fn test_expand_missing_env_var_kept() {
        let out = expand_env_vars("x = \"${SKEIN_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "x = \"${SKEIN_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/skein.toml")).unwrap_err();
        assert!(matches!(err, SkeinError::ConfigNotFound(_)));
    }
}
