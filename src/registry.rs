//! Schema Registry
//!
//! Loads compiled schema modules and resolves type names against them.
//!
//! A compiled module is a `FileDescriptorSet` written by
//! `protoc --include_imports --descriptor_set_out`. Every `.proto` file found
//! in the loaded sets becomes one module, named after its path
//! (`pkgA/widget.proto` -> `pkgA.widget`). Imports that show up in several
//! sets are loaded once.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use prost::Message;
use prost_types::FileDescriptorSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::CompileManifest;
use crate::error::{ProtopadError, Result};
use crate::schema::{top_level_messages, MessageDescriptor, SchemaPool};

/// File extension of compiled modules
pub const COMPILED_EXTENSION: &str = "pb";

/// Source of schema definitions
pub trait SchemaModule {
    /// Label used in logs (usually the artifact path)
    fn label(&self) -> String;

    /// Load the descriptors this module provides
    fn load(&self) -> Result<FileDescriptorSet>;
}

/// A descriptor-set file produced by `protoc`
pub struct CompiledModule {
    path: PathBuf,
}

impl CompiledModule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SchemaModule for CompiledModule {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<FileDescriptorSet> {
        let data = fs::read(&self.path)?;
        FileDescriptorSet::decode(data.as_slice()).map_err(|e| ProtopadError::SchemaLoad {
            module: self.label(),
            reason: e.to_string(),
        })
    }
}

/// Descriptors held in memory
pub struct StaticModule {
    label: String,
    set: FileDescriptorSet,
}

impl StaticModule {
    pub fn new(label: impl Into<String>, set: FileDescriptorSet) -> Self {
        Self {
            label: label.into(),
            set,
        }
    }
}

impl SchemaModule for StaticModule {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn load(&self) -> Result<FileDescriptorSet> {
        Ok(self.set.clone())
    }
}

/// Find every compiled module below `compiled_dir`, in a stable order
pub fn compiled_modules(compiled_dir: &Path) -> Vec<Box<dyn SchemaModule>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(compiled_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file())
        .filter(|p| p.extension().map(|ext| ext == COMPILED_EXTENSION).unwrap_or(false))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|p| Box::new(CompiledModule::new(p)) as Box<dyn SchemaModule>)
        .collect()
}

/// Every message type of every loaded module
pub struct SchemaRegistry {
    pool: Arc<SchemaPool>,
}

impl SchemaRegistry {
    /// Build a registry from modules.
    ///
    /// Modules that fail to load, and files that cannot be represented, are
    /// logged and skipped; they never abort the scan.
    pub fn from_modules(modules: &[Box<dyn SchemaModule>]) -> Self {
        let mut files = Vec::new();
        for module in modules {
            debug!("Loading module: {}", module.label());
            match module.load() {
                Ok(set) => {
                    for file in &set.file {
                        debug!("  Found file: {}", file.name());
                    }
                    files.extend(set.file);
                }
                Err(e) => warn!("  (Module {} could not be loaded: {})", module.label(), e),
            }
        }

        let (pool, errors) = SchemaPool::build(files);
        for error in errors {
            warn!("  Skipping: {}", error);
        }

        let pool = Arc::new(pool);
        for desc in top_level_messages(&pool) {
            debug!("  Found message type: {}", desc.qualified_name());
        }

        Self { pool }
    }

    /// Load every compiled module below `compiled_dir`
    pub fn load(compiled_dir: &Path) -> Self {
        if let Some(manifest) = CompileManifest::read(compiled_dir) {
            for stale in manifest.stale_sources() {
                warn!(
                    "{} changed since it was compiled; run `protopad register --recompile`",
                    stale.display()
                );
            }
        }
        Self::from_modules(&compiled_modules(compiled_dir))
    }

    /// Every resolvable (top-level) message type
    pub fn message_types(&self) -> Vec<MessageDescriptor> {
        top_level_messages(&self.pool)
    }

    /// Resolve a bare or prefixed type name to exactly one message type.
    ///
    /// `prefix.TypeName` keeps only candidates whose module name contains
    /// `prefix` as a substring.
    pub fn resolve(&self, type_name: &str) -> Result<MessageDescriptor> {
        let options = self.message_types();
        if options.is_empty() {
            return Err(ProtopadError::NoSchemas);
        }

        let (prefix, name) = match type_name.rsplit_once('.') {
            Some((prefix, name)) => (prefix, name),
            None => ("", type_name),
        };

        let mut selection: Vec<MessageDescriptor> = options
            .iter()
            .filter(|desc| desc.name() == name && desc.module_name().contains(prefix))
            .cloned()
            .collect();

        match selection.len() {
            0 => Err(ProtopadError::TypeNotFound {
                name: name.to_string(),
                suggestions: suggest(&options, name),
            }),
            1 => Ok(selection.remove(0)),
            _ => Err(ProtopadError::TypeAmbiguous {
                name: name.to_string(),
                candidates: selection.iter().map(|d| d.qualified_name()).collect(),
            }),
        }
    }
}

/// Up to three closest type names for a failed lookup
fn suggest(options: &[MessageDescriptor], query: &str) -> Vec<String> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, String)> = options
        .iter()
        .filter_map(|desc| {
            matcher
                .fuzzy_match(desc.name(), query)
                .map(|score| (score, desc.qualified_name()))
        })
        .collect();

    // Sort by score descending
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored.into_iter().take(3).map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixture_registry, module, testdata_file};
    use tempfile::tempdir;

    #[test]
    fn test_resolve_bare_name() {
        let registry = fixture_registry();
        let desc = registry.resolve("Outer").unwrap();
        assert_eq!(desc.full_name(), "testdata.Outer");
        assert_eq!(desc.module_name(), "testdata");
    }

    #[test]
    fn test_resolve_ambiguous() {
        let registry = fixture_registry();
        match registry.resolve("Widget") {
            Err(ProtopadError::TypeAmbiguous { candidates, .. }) => {
                assert_eq!(candidates, vec!["pkgA.widget.Widget", "pkgB.widget.Widget"]);
            }
            other => panic!("Expected TypeAmbiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_with_prefix() {
        let registry = fixture_registry();
        let desc = registry.resolve("pkgA.Widget").unwrap();
        assert_eq!(desc.full_name(), "pkgA.Widget");
        assert!(desc.field_by_name("size").is_some());

        // Any substring of the module name works
        let desc = registry.resolve("B.Widget").unwrap();
        assert_eq!(desc.full_name(), "pkgB.Widget");
    }

    #[test]
    fn test_resolve_not_found_suggests() {
        let registry = fixture_registry();
        match registry.resolve("Envelop") {
            Err(ProtopadError::TypeNotFound { name, suggestions }) => {
                assert_eq!(name, "Envelop");
                assert!(suggestions.contains(&"testdata.Envelope".to_string()));
            }
            other => panic!("Expected TypeNotFound, got {:?}", other),
        }
        assert!(matches!(
            registry.resolve("NoSuchType"),
            Err(ProtopadError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn test_nested_types_not_resolvable() {
        let registry = fixture_registry();
        assert!(matches!(
            registry.resolve("CountersEntry"),
            Err(ProtopadError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = SchemaRegistry::from_modules(&[]);
        assert!(matches!(registry.resolve("Anything"), Err(ProtopadError::NoSchemas)));
    }

    #[test]
    fn test_corrupt_module_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.pb"), b"\xff\xff\xff\xff").unwrap();
        let good = FileDescriptorSet {
            file: vec![testdata_file()],
        };
        fs::write(dir.path().join("testdata.pb"), good.encode_to_vec()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let registry = SchemaRegistry::load(dir.path());
        assert!(registry.resolve("Inner").is_ok());
    }

    #[test]
    fn test_static_and_compiled_modules_mix() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("pkgA");
        fs::create_dir_all(&nested).unwrap();
        let widgets = FileDescriptorSet {
            file: crate::test_utils::widget_files(),
        };
        fs::write(nested.join("widget.pb"), widgets.encode_to_vec()).unwrap();

        let mut modules = compiled_modules(dir.path());
        assert_eq!(modules.len(), 1);
        modules.push(module("testdata", vec![testdata_file()]));

        let registry = SchemaRegistry::from_modules(&modules);
        assert!(registry.resolve("pkgB.Widget").is_ok());
        assert!(registry.resolve("TestMessage").is_ok());
    }
}
