//! Configuration file discovery and loading
//!
//! Engine components carry their own serde-derived config structs with
//! `Default` impls; this module only knows how to find and parse the
//! TOML file that overrides them.

use crate::error::{ErrorContext, SibylError, SibylResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the configuration file looked up in the working directory and
/// the platform config directory
pub const CONFIG_FILE_NAME: &str = "sibyl.toml";

/// Locate the configuration file: explicit path, then `./sibyl.toml`,
/// then `<config_dir>/sibyl/sibyl.toml`. Returns `None` when nothing exists.
pub fn discover_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let cwd_candidate = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_candidate.exists() {
        return Some(cwd_candidate);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("sibyl").join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

/// Load a TOML config file into any deserializable struct
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> SibylResult<T> {
    debug!("Loading configuration from {}", path.display());

    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| SibylError::Config {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("config")
            .with_operation("load_toml")
            .with_suggestion("Check the TOML syntax of the configuration file"),
    })
}

/// Serialize a config struct back to a TOML file
pub fn save_toml<T: Serialize>(value: &T, path: &Path) -> SibylResult<()> {
    let rendered = toml::to_string_pretty(value).map_err(|e| SibylError::Config {
        message: format!("Failed to serialize configuration: {}", e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("config").with_operation("save_toml"),
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        top_k: u32,
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sibyl.toml");

        let sample = Sample {
            name: "local".to_string(),
            top_k: 5,
        };
        save_toml(&sample, &path).unwrap();

        let loaded: Sample = load_toml(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sibyl.toml");
        std::fs::write(&path, "name = [unclosed").unwrap();

        let result: SibylResult<Sample> = load_toml(&path);
        assert!(matches!(result, Err(SibylError::Config { .. })));
    }

    #[test]
    fn test_discover_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "").unwrap();

        let found = discover_config_file(Some(&path)).unwrap();
        assert_eq!(found, path);
    }
}
