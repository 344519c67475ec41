//! Content-addressed tool catalog built from the adapter source

use super::adapter::parse_adapter;
use crate::error::{Error, Result};
use crate::types::ToolCatalog;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds and caches the [`ToolCatalog`] for one adapter file.
///
/// The cached catalog is keyed by the SHA-256 of the adapter source, so an
/// unchanged file always yields the same `Arc` and an edited file is picked
/// up on the next lookup. Readers never observe a half-built catalog: a new
/// one is fully parsed before it replaces the old one.
pub struct ToolCatalogBuilder {
    source: PathBuf,
    cache_file: Option<PathBuf>,
    current: RwLock<Option<Arc<ToolCatalog>>>,
}

impl ToolCatalogBuilder {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            cache_file: None,
            current: RwLock::new(None),
        }
    }

    /// Persist built catalogs to `path` and reuse it across restarts
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Hex SHA-256 of adapter source bytes
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Parse adapter source text into a catalog
    pub fn build_from_source(source: &str) -> ToolCatalog {
        ToolCatalog {
            hash: Self::content_hash(source.as_bytes()),
            tools: parse_adapter(source),
        }
    }

    /// Build a fresh catalog from the adapter file, bypassing the cache
    pub fn build(&self) -> Result<ToolCatalog> {
        let source = self.read_source()?;
        let catalog = Self::build_from_source(&source);
        info!(
            "Built tool catalog from {}: {} tools",
            self.source.display(),
            catalog.tools.len()
        );
        Ok(catalog)
    }

    /// Catalog for the adapter's current content, rebuilding only on change
    pub fn get_cached(&self) -> Result<Arc<ToolCatalog>> {
        let source = self.read_source()?;
        let hash = Self::content_hash(source.as_bytes());

        if let Some(catalog) = self.current.read().as_ref() {
            if catalog.hash == hash {
                return Ok(catalog.clone());
            }
        }

        let catalog = match self.load_persisted(&hash) {
            Some(catalog) => Arc::new(catalog),
            None => {
                let catalog = Arc::new(ToolCatalog {
                    hash,
                    tools: parse_adapter(&source),
                });
                info!(
                    "Rebuilt tool catalog {}: {} tools",
                    short_hash(&catalog.hash),
                    catalog.tools.len()
                );
                if let Err(e) = self.persist(&catalog) {
                    warn!("Failed to write tool catalog cache: {}", e);
                }
                catalog
            }
        };

        let mut current = self.current.write();
        // Another caller may have published the same content meanwhile
        if let Some(existing) = current.as_ref() {
            if existing.hash == catalog.hash {
                return Ok(existing.clone());
            }
        }
        *current = Some(catalog.clone());
        Ok(catalog)
    }

    /// Last published catalog, without touching the adapter file
    pub fn current(&self) -> Option<Arc<ToolCatalog>> {
        self.current.read().clone()
    }

    fn read_source(&self) -> Result<String> {
        std::fs::read_to_string(&self.source).map_err(|e| {
            Error::CatalogBuildFailed(format!("{}: {}", self.source.display(), e))
        })
    }

    fn load_persisted(&self, hash: &str) -> Option<ToolCatalog> {
        let path = self.cache_file.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<ToolCatalog>(&content) {
            Ok(catalog) if catalog.hash == hash => {
                debug!("Loaded tool catalog from cache {}", path.display());
                Some(catalog)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Ignoring unreadable catalog cache {}: {}", path.display(), e);
                None
            }
        }
    }

    fn persist(&self, catalog: &ToolCatalog) -> Result<()> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(catalog)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
