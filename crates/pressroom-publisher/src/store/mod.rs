//! Storage ports of the publish pipeline and their reference adapters.
//!
//! Every external collaborator is a trait: site configuration, templates, the
//! content repository, the output object store, graph persistence, the
//! metadata index, asset downloads and error notification. [`memory`] holds
//! in-memory adapters, [`fs`] filesystem-backed ones.

pub mod fs;
pub mod memory;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use pressroom_core::{Asset, AssetFile, ContentBatch, CoreError, Entry, SiteConfig};
use pressroom_generator::{TemplateError, TemplateSet};
use thiserror::Error;

use crate::{
    graph::{ReferenceGraph, VersionedGraph},
    metadata::{IndexOp, MetadataRecord, MetadataSnapshot},
    notify::ErrorNotifier,
};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object or document not found where one is required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write rejected because the stored version moved.
    #[error("version conflict on {key}: expected {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Asset download failed.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Configuration or payload error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Template loading error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Loads site configurations.
#[async_trait]
pub trait SiteConfigSource: Send + Sync {
    async fn load(&self, site: &str) -> Result<SiteConfig>;
}

/// Loads a site's compiled templates.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn templates(&self, site: &str) -> Result<Arc<TemplateSet>>;
}

/// The content repository.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch entries by ID, including linked entries and assets up to `include` levels.
    async fn fetch_entries(&self, site: &str, ids: &[String], include: u8) -> Result<ContentBatch>;

    /// List every entry of a content type, without includes.
    async fn list_entries(&self, site: &str, content_type: &str) -> Result<Vec<Entry>>;
}

/// Object store holding generated output.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, site: &str, key: &str, content_type: &str, content: Vec<u8>) -> Result<()>;

    async fn delete(&self, site: &str, key: &str) -> Result<()>;
}

/// Reference graph persistence with optimistic concurrency.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Read a graph and its version stamp. `None` when never saved.
    async fn load(&self, key: &str) -> Result<Option<VersionedGraph>>;

    /// Write a graph if the stored version still equals `expected`.
    ///
    /// Returns the new version, or [`StoreError::Conflict`].
    async fn save(&self, key: &str, graph: &ReferenceGraph, expected: Option<u64>) -> Result<u64>;
}

/// The metadata index.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read every record of an index.
    async fn scan(&self, index: &str) -> Result<MetadataSnapshot>;

    /// Read one record.
    async fn get(&self, index: &str, id: &str) -> Result<Option<MetadataRecord>>;

    /// Apply a batch of operations, returning the ones that were not applied.
    async fn write_batch(&self, index: &str, ops: &[IndexOp]) -> Result<Vec<IndexOp>>;
}

/// A downloaded asset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub content: Vec<u8>,

    /// Content type reported by the source, if any.
    pub content_type: Option<String>,
}

/// Downloads asset files.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, file: &AssetFile) -> Result<FetchedAsset>;
}

/// Every collaborator the pipeline talks to.
#[derive(Clone)]
pub struct Stores {
    pub configs: Arc<dyn SiteConfigSource>,
    pub templates: Arc<dyn TemplateSource>,
    pub content: Arc<dyn ContentSource>,
    pub objects: Arc<dyn ObjectStore>,
    pub graphs: Arc<dyn GraphStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub assets: Arc<dyn AssetFetcher>,
    pub notifier: Arc<dyn ErrorNotifier>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Select entries by ID from an export and include linked objects up to `include` levels.
///
/// Shared by the adapters that serve content from a local export.
pub(crate) fn select_with_includes(
    entries: &[Entry],
    assets: &[Asset],
    ids: &[String],
    include: u8,
) -> ContentBatch {
    let find_entry = |id: &str| entries.iter().find(|e| e.id() == id);

    let items: Vec<Entry> = ids
        .iter()
        .filter_map(|id| find_entry(id).cloned())
        .collect();

    let mut seen: HashSet<String> = items.iter().map(|e| e.id().to_string()).collect();
    let mut seen_assets: HashSet<String> = HashSet::new();
    let mut batch = ContentBatch::default();
    let mut level: Vec<&Entry> = items.iter().collect();

    for _ in 0..include {
        let mut next = Vec::new();
        for entry in level {
            for link in entry.field_links(false) {
                if link.is_entry() {
                    if !seen.insert(link.id.clone()) {
                        continue;
                    }
                    if let Some(linked) = find_entry(&link.id) {
                        batch.includes.entries.push(linked.clone());
                        next.push(linked);
                    }
                } else if seen_assets.insert(link.id.clone()) {
                    if let Some(asset) = assets.iter().find(|a| a.id() == link.id) {
                        batch.includes.assets.push(asset.clone());
                    }
                }
            }
        }
        level = next;
    }

    batch.items = items;
    batch
}
