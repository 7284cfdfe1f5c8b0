//! Project configuration for covmark.
//!
//! Everything is optional; a missing file means defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// File names probed, in order, when no config path is given.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["covmark.yaml", ".covmark.yaml"];

/// Top-level configuration, read from `covmark.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Glob patterns excluded from instrumentation, on top of the
    /// dependency and test directories (e.g., "**/vendor/**").
    #[serde(default)]
    pub exclude: Vec<String>,
    /// File extensions the loader hook wraps. Default: [".js"]
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
}

impl Config {
    /// Parse a configuration from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Probe the default file names under `dir`. A directory without a
    /// config file yields the defaults.
    pub fn discover(dir: &Path) -> anyhow::Result<Self> {
        for name in DEFAULT_CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Self::parse_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Extensions the hook wraps (defaults to ".js").
    pub fn hooked_extensions(&self) -> Vec<&str> {
        match &self.extensions {
            Some(extensions) => extensions.iter().map(String::as_str).collect(),
            None => vec![".js"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.exclude.is_empty());
        assert_eq!(config.hooked_extensions(), vec![".js"]);
    }

    #[test]
    fn test_parse_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("covmark.yaml");
        fs::write(
            &path,
            "exclude:\n  - \"**/vendor/**\"\nextensions:\n  - \".js\"\n  - \".mjs\"\n",
        )
        .unwrap();

        let config = Config::parse_file(&path).unwrap();
        assert_eq!(config.exclude, vec!["**/vendor/**"]);
        assert_eq!(config.hooked_extensions(), vec![".js", ".mjs"]);
    }

    #[test]
    fn test_discover_finds_dotfile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".covmark.yaml"), "exclude: [\"**/gen/**\"]\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.exclude, vec!["**/gen/**"]);
    }

    #[test]
    fn test_discover_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert!(config.exclude.is_empty());
        assert_eq!(config.hooked_extensions(), vec![".js"]);
    }

    #[test]
    fn test_invalid_yaml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("covmark.yaml");
        fs::write(&path, "exclude: {not: [valid").unwrap();
        assert!(Config::parse_file(&path).is_err());
    }
}
