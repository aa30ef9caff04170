//! Schema compilation through `protoc`
//!
//! Every `.proto` file below a registered path is compiled into its own
//! descriptor set (`--include_imports`), laid out in the compiled directory
//! with the same relative path and a `.pb` extension.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checksum::{Checksum, CompileManifest, ManifestEntry};
use crate::error::{ProtopadError, Result};
use crate::registry::COMPILED_EXTENSION;
use crate::schema::module_name;

/// Runs `protoc` over registered schema paths
pub struct ProtocCompiler {
    protoc: String,
    compiled_dir: PathBuf,
}

/// `.proto` files below `path`, sorted, with the include root they compile against
fn proto_sources(path: &Path) -> (PathBuf, Vec<PathBuf>) {
    let root = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file())
        .filter(|p| p.extension().map(|ext| ext == "proto").unwrap_or(false))
        .collect();
    files.sort();

    (root, files)
}

/// Relative path with `/` separators on every platform
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl ProtocCompiler {
    pub fn new(protoc: impl Into<String>, compiled_dir: impl Into<PathBuf>) -> Self {
        Self {
            protoc: protoc.into(),
            compiled_dir: compiled_dir.into(),
        }
    }

    /// Recompile everything below `paths` from scratch.
    ///
    /// All files are attempted; the manifest records the ones that compiled
    /// and any failures are returned together afterwards.
    pub fn compile_all(&self, paths: &[PathBuf]) -> Result<CompileManifest> {
        if self.compiled_dir.exists() {
            fs::remove_dir_all(&self.compiled_dir)?;
        }
        fs::create_dir_all(&self.compiled_dir)?;

        let mut entries = Vec::new();
        let mut failures = Vec::new();

        for path in paths {
            if !path.exists() {
                warn!("Registered path {} does not exist", path.display());
                continue;
            }
            let (root, files) = proto_sources(path);
            info!("Compiling {} proto file(s) from {}", files.len(), path.display());

            for file in files {
                match self.compile_file(&root, &file) {
                    Ok(entry) => entries.push(entry),
                    Err(message) => failures.push(message),
                }
            }
        }

        let manifest = CompileManifest::new(entries);
        manifest.write(&self.compiled_dir)?;

        if failures.is_empty() {
            Ok(manifest)
        } else {
            Err(ProtopadError::Compilation(failures))
        }
    }

    fn compile_file(&self, root: &Path, file: &Path) -> std::result::Result<ManifestEntry, String> {
        let relative = file.strip_prefix(root).unwrap_or(file);
        let artifact = relative.with_extension(COMPILED_EXTENSION);
        let out = self.compiled_dir.join(&artifact);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("{}: {}", file.display(), e))?;
        }

        debug!("Running {} for {}", self.protoc, file.display());
        let output = Command::new(&self.protoc)
            .arg("-I")
            .arg(root)
            .arg("--include_imports")
            .arg("--descriptor_set_out")
            .arg(&out)
            .arg(file)
            .output()
            .map_err(|e| format!("{}: could not run {}: {}", file.display(), self.protoc, e))?;

        if !output.status.success() {
            let mut message = file.display().to_string();
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                message.push_str("\n    ");
                message.push_str(line);
            }
            return Err(message);
        }

        let checksum = Checksum::of_file(file).map_err(|e| format!("{}: {}", file.display(), e))?;
        Ok(ManifestEntry {
            module: module_name(&slash_path(relative)),
            source: file.to_path_buf(),
            artifact,
            checksum,
        })
    }
}
