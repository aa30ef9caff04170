//! Configuration management for protopad
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (`config.toml` in the user config directory)
//! - An explicit file passed with `--config`
//! - Environment variables (`PROTOPAD__*`, e.g. `PROTOPAD__EDITOR__COMMAND`)
//!
//! ## Example config file:
//! ```toml
//! [registry]
//! paths = ["/home/me/src/protos"]
//! protoc = "protoc"
//!
//! [editor]
//! command = "vim"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProtopadError, Result};

/// Name of the config file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Scratch file handed to the editor, kept for `edit --recent`
pub const SCRATCH_FILE: &str = "temp.json";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtopadConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub editor: EditorConfig,
}

/// Registered schema sources and how they are compiled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Absolute paths of registered `.proto` files or directories
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Where compiled modules live (defaults to `<data dir>/compiled`)
    #[serde(default)]
    pub compiled_dir: Option<PathBuf>,

    /// `protoc` executable
    #[serde(default = "default_protoc")]
    pub protoc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Editor command; `$EDITOR` is used when unset
    #[serde(default)]
    pub command: Option<String>,
}

fn default_protoc() -> String {
    "protoc".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            compiled_dir: None,
            protoc: default_protoc(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "protopad", "protopad")
}

/// Absolute form of `path`, resolving symlinks when it exists
pub fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    })
}

impl ProtopadConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with `config_path` taking the place of the default file
    pub fn load_from(config_path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match config_path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(default) = Self::default_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PROTOPAD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file, creating its directory
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    /// Directory for compiled modules and the scratch file
    pub fn data_dir() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| absolute(Path::new(".protopad")))
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.registry
            .compiled_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("compiled"))
    }

    pub fn scratch_file(&self) -> PathBuf {
        Self::data_dir().join(SCRATCH_FILE)
    }

    /// Register a path; returns false if it was already registered
    pub fn register(&mut self, path: &Path) -> bool {
        let path = absolute(path);
        if self.registry.paths.contains(&path) {
            return false;
        }
        self.registry.paths.push(path);
        true
    }

    /// Unregister a path
    pub fn unregister(&mut self, path: &Path) -> Result<()> {
        let path = absolute(path);
        let before = self.registry.paths.len();
        self.registry.paths.retain(|p| p != &path);
        if self.registry.paths.len() == before {
            return Err(ProtopadError::PathNotRegistered(path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ProtopadConfig::default();
        assert!(config.registry.paths.is_empty());
        assert_eq!(config.registry.protoc, "protoc");
        assert!(config.editor.command.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = ProtopadConfig::default();
        assert!(config.register(dir.path()));
        assert!(!config.register(dir.path()));
        config.editor.command = Some("nano".to_string());
        config.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[registry]"));
        assert!(content.contains("[editor]"));

        let loaded = ProtopadConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.registry.paths, vec![absolute(dir.path())]);
        assert_eq!(loaded.editor.command.as_deref(), Some("nano"));
    }

    #[test]
    fn test_unregister() {
        let dir = tempdir().unwrap();
        let mut config = ProtopadConfig::default();
        config.register(dir.path());

        let other = dir.path().join("elsewhere");
        assert!(matches!(
            config.unregister(&other),
            Err(ProtopadError::PathNotRegistered(_))
        ));
        config.unregister(dir.path()).unwrap();
        assert!(config.registry.paths.is_empty());
    }

    #[test]
    fn test_compiled_dir_override() {
        let mut config = ProtopadConfig::default();
        assert!(config.compiled_dir().ends_with("compiled"));
        config.registry.compiled_dir = Some(PathBuf::from("/tmp/modules"));
        assert_eq!(config.compiled_dir(), PathBuf::from("/tmp/modules"));
    }
}
