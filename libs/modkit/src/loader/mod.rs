//! Filesystem discovery of feature modules.
//!
//! Layout: `<root>/<module>/<entry_file>`. The entry file is a
//! [`ModuleManifest`]; its `entry` key is resolved in a [`ModuleCatalog`] of
//! compiled-in factories. Each module loads independently, so one bad
//! manifest never keeps the others out.

mod catalog;
mod manifest;

pub use catalog::{ModuleCatalog, ModuleFactory};
pub use manifest::ModuleManifest;

use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::contracts::ModuleDescriptor;
use crate::error::ValidationError;

pub const DEFAULT_ENTRY_FILE: &str = "module.yaml";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module '{0}' not found under the modules root")]
    NotFound(String),
}

/// A module directory that holds an entry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredModule {
    /// Directory name.
    pub name: String,
    pub path: PathBuf,
    pub entry_path: PathBuf,
}

/// A validated module ready for registration.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub source: DiscoveredModule,
    pub manifest: ModuleManifest,
    pub descriptor: ModuleDescriptor,
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[derive(Debug)]
pub struct LoadFailure {
    /// Directory name; the manifest may not have yielded a usable name.
    pub name: String,
    pub path: PathBuf,
    pub error: LoaderError,
}

/// Outcome of [`ModuleLoader::load_all`], both lists in discovery order.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedModule>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn failure(&self, name: &str) -> Option<&LoadFailure> {
        self.failures.iter().find(|f| f.name == name)
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded.iter().map(LoadedModule::name).collect()
    }
}

pub struct ModuleLoader {
    root: PathBuf,
    entry_file: String,
    catalog: ModuleCatalog,
    cache: DashMap<String, LoadedModule>,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("root", &self.root)
            .field("entry_file", &self.entry_file)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ModuleLoader {
    pub fn new(root: impl Into<PathBuf>, catalog: ModuleCatalog) -> Self {
        Self {
            root: root.into(),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            catalog,
            cache: DashMap::new(),
        }
    }

    pub fn with_entry_file(mut self, entry_file: impl Into<String>) -> Self {
        self.entry_file = entry_file.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredModule>, LoaderError> {
        self.discover_in(&self.root).await
    }

    /// Every immediate subdirectory of `root` holding the entry file, sorted
    /// by directory name. A missing root is an empty result.
    pub async fn discover_in(&self, root: &Path) -> Result<Vec<DiscoveredModule>, LoaderError> {
        let io_err = |source: io::Error| LoaderError::Io {
            path: root.to_path_buf(),
            source,
        };
        let mut dir = match tokio::fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(root = %root.display(), "Modules root does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_err(e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if !entry.file_type().await.map_err(io_err)?.is_dir() {
                continue;
            }
            let entry_path = path.join(&self.entry_file);
            let has_entry = tokio::fs::metadata(&entry_path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !has_entry {
                tracing::debug!(dir = %path.display(), entry = %self.entry_file, "Skipping directory without entry file");
                continue;
            }
            found.push(DiscoveredModule {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                entry_path,
            });
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Load one module, serving it from the cache when it was loaded before.
    pub async fn load(&self, module: &DiscoveredModule) -> Result<LoadedModule, LoaderError> {
        if let Some(cached) = self.cache.get(&module.name) {
            return Ok(cached.clone());
        }
        let loaded = self.load_fresh(module).await?;
        self.cache.insert(module.name.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Discover, then load every module concurrently.
    pub async fn load_all(&self) -> Result<LoadReport, LoaderError> {
        let discovered = self.discover().await?;
        let results = join_all(discovered.iter().map(|d| self.load(d))).await;

        let mut report = LoadReport::default();
        for (source, result) in discovered.into_iter().zip(results) {
            match result {
                Ok(loaded) => report.loaded.push(loaded),
                Err(error) => {
                    tracing::warn!(module = %source.name, error = %error, "Module failed to load");
                    report.failures.push(LoadFailure {
                        name: source.name,
                        path: source.path,
                        error,
                    });
                }
            }
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            root = %self.root.display(),
            "Module discovery complete"
        );
        Ok(report)
    }

    /// Re-read `name`'s manifest from disk and rebuild it, replacing the
    /// cached copy. `name` may be the module name or its directory name.
    pub async fn reload(&self, name: &str) -> Result<LoadedModule, LoaderError> {
        let known = self
            .cache
            .iter()
            .find(|e| e.key() == name || e.value().name() == name)
            .map(|e| e.value().source.clone());
        let source = match known {
            Some(source) => source,
            None => self
                .discover()
                .await?
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| LoaderError::NotFound(name.to_string()))?,
        };

        let loaded = self.load_fresh(&source).await?;
        self.cache.insert(source.name.clone(), loaded.clone());
        tracing::info!(module = loaded.name(), "Module reloaded");
        Ok(loaded)
    }

    async fn load_fresh(&self, source: &DiscoveredModule) -> Result<LoadedModule, LoaderError> {
        let text = tokio::fs::read_to_string(&source.entry_path)
            .await
            .map_err(|e| LoaderError::Io {
                path: source.entry_path.clone(),
                source: e,
            })?;
        let manifest = ModuleManifest::parse(&text, &source.name)?;

        let descriptor = ModuleDescriptor {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            dependencies: manifest.dependencies.clone(),
            provides: manifest.provides.clone(),
            module: self.catalog.build(&manifest.entry),
        };
        if descriptor.module.is_none() {
            tracing::debug!(module = %source.name, entry = %manifest.entry, "No factory for entry");
        }
        descriptor.validate()?;

        Ok(LoadedModule {
            source: source.clone(),
            manifest,
            descriptor,
        })
    }
}
