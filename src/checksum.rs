//! Checksums for detecting stale compiled modules
//!
//! The compiler records a SHA256 checksum of every `.proto` source next to the
//! compiled modules (`manifest.json`). Loading the registry compares them with
//! the sources on disk so edits made after the last compile are reported.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Name of the manifest written into the compiled directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// SHA256 checksum of a schema source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Checksum of a file's current content
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_bytes(&fs::read(path)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One compiled module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Module name (`pkgA.widget`)
    pub module: String,
    /// Absolute path of the `.proto` source
    pub source: PathBuf,
    /// Compiled artifact, relative to the compiled directory
    pub artifact: PathBuf,
    /// Checksum of the source at compile time
    pub checksum: Checksum,
}

/// Record of the last compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileManifest {
    pub compiled_at: DateTime<Utc>,
    pub modules: Vec<ManifestEntry>,
}

impl CompileManifest {
    pub fn new(modules: Vec<ManifestEntry>) -> Self {
        Self {
            compiled_at: Utc::now(),
            modules,
        }
    }

    /// Read the manifest of a compiled directory, if there is a readable one
    pub fn read(compiled_dir: &Path) -> Option<Self> {
        let path = compiled_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn write(&self, compiled_dir: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(compiled_dir.join(MANIFEST_FILE), content)
    }

    /// Sources that were removed or changed since compilation
    pub fn stale_sources(&self) -> Vec<&Path> {
        self.modules
            .iter()
            .filter(|entry| match Checksum::of_file(&entry.source) {
                Ok(current) => current != entry.checksum,
                Err(_) => true,
            })
            .map(|entry| entry.source.as_path())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_consistency() {
        let content = b"syntax = \"proto3\";";
        assert_eq!(Checksum::from_bytes(content), Checksum::from_bytes(content));
        assert_ne!(Checksum::from_bytes(content), Checksum::from_bytes(b"syntax = \"proto2\";"));
    }

    #[test]
    fn test_stale_sources() {
        let dir = tempdir().unwrap();
        let fresh = dir.path().join("fresh.proto");
        let edited = dir.path().join("edited.proto");
        fs::write(&fresh, "message A {}").unwrap();
        fs::write(&edited, "message B {}").unwrap();

        let entry = |source: &Path| ManifestEntry {
            module: "m".to_string(),
            source: source.to_path_buf(),
            artifact: PathBuf::from("m.pb"),
            checksum: Checksum::of_file(source).unwrap(),
        };
        let manifest = CompileManifest::new(vec![entry(&fresh), entry(&edited)]);
        manifest.write(dir.path()).unwrap();

        fs::write(&edited, "message B { int32 x = 1; }").unwrap();

        let manifest = CompileManifest::read(dir.path()).unwrap();
        assert_eq!(manifest.stale_sources(), vec![edited.as_path()]);
    }
}
