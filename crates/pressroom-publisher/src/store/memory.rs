//! In-memory adapters for every storage port.
//!
//! Used by tests and for dry runs. Metadata writes can be told to report
//! operations as unprocessed, and object writes can be made to fail, to
//! exercise the retry and isolation paths.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use pressroom_core::{Asset, AssetFile, ContentBatch, CoreError, Entry, SiteConfig};
use pressroom_generator::TemplateSet;
use tokio::sync::Mutex;

use super::{
    AssetFetcher, ContentSource, FetchedAsset, GraphStore, MetadataStore, ObjectStore, Result,
    SiteConfigSource, StoreError, Stores, TemplateSource, select_with_includes,
};
use crate::{
    graph::{ReferenceGraph, VersionedGraph},
    metadata::{IndexOp, MetadataRecord, MetadataSnapshot},
    notify::{ErrorNotifier, TaskFailure},
};

/// An object held by the in-memory object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub content: Vec<u8>,
}

impl StoredObject {
    /// Content as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

#[derive(Debug, Default)]
struct State {
    configs: HashMap<String, SiteConfig>,
    templates: HashMap<String, Arc<TemplateSet>>,
    entries: HashMap<String, Vec<Entry>>,
    assets: HashMap<String, Vec<Asset>>,
    asset_files: HashMap<String, Vec<u8>>,
    objects: BTreeMap<(String, String), StoredObject>,
    failing_objects: HashSet<String>,
    graphs: HashMap<String, (ReferenceGraph, u64)>,
    graph_races: HashSet<String>,
    metadata: HashMap<String, MetadataSnapshot>,
    write_failures: VecDeque<usize>,
    write_calls: Vec<usize>,
    fetch_calls: Vec<Vec<String>>,
    failures: Vec<TaskFailure>,
}

/// All storage ports backed by memory.
#[derive(Debug, Default)]
pub struct MemoryStores {
    state: Mutex<State>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this adapter as every port of [`Stores`].
    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            configs: self.clone(),
            templates: self.clone(),
            content: self.clone(),
            objects: self.clone(),
            graphs: self.clone(),
            metadata: self.clone(),
            assets: self.clone(),
            notifier: self.clone(),
        }
    }

    /// Register a site with its configuration and templates.
    pub async fn add_site(&self, config: SiteConfig, templates: TemplateSet) {
        let mut state = self.state.lock().await;
        state
            .templates
            .insert(config.site_id.clone(), Arc::new(templates));
        state.configs.insert(config.site_id.clone(), config);
    }

    /// Add or replace an entry in a site's content repository.
    pub async fn put_entry(&self, site: &str, entry: Entry) {
        let mut state = self.state.lock().await;
        let entries = state.entries.entry(site.to_string()).or_default();
        entries.retain(|e| e.id() != entry.id());
        entries.push(entry);
    }

    /// Remove an entry from a site's content repository.
    pub async fn remove_entry(&self, site: &str, id: &str) {
        if let Some(entries) = self.state.lock().await.entries.get_mut(site) {
            entries.retain(|e| e.id() != id);
        }
    }

    /// Add or replace an asset in a site's content repository.
    pub async fn put_asset(&self, site: &str, asset: Asset) {
        let mut state = self.state.lock().await;
        let assets = state.assets.entry(site.to_string()).or_default();
        assets.retain(|a| a.id() != asset.id());
        assets.push(asset);
    }

    /// Serve `content` for downloads of `url`.
    pub async fn put_asset_file(&self, url: &str, content: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .await
            .asset_files
            .insert(url.to_string(), content.into());
    }

    /// Make every write of the object key fail.
    pub async fn fail_object_writes(&self, key: &str) {
        self.state.lock().await.failing_objects.insert(key.to_string());
    }

    /// Report the last `n` operations of upcoming metadata write calls as
    /// unprocessed, one count per call.
    pub async fn fail_next_writes(&self, counts: impl IntoIterator<Item = usize>) {
        self.state.lock().await.write_failures.extend(counts);
    }

    /// Simulate another writer saving the graph right after the next load of `key`.
    pub async fn race_next_graph_load(&self, key: &str) {
        self.state.lock().await.graph_races.insert(key.to_string());
    }

    /// Seed a metadata index.
    pub async fn set_metadata(&self, index: &str, snapshot: MetadataSnapshot) {
        self.state
            .lock()
            .await
            .metadata
            .insert(index.to_string(), snapshot);
    }

    pub async fn object(&self, site: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .await
            .objects
            .get(&(site.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys of every object stored for a site, sorted.
    pub async fn object_keys(&self, site: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(s, _)| s == site)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub async fn stored_graph(&self, key: &str) -> Option<VersionedGraph> {
        self.state
            .lock()
            .await
            .graphs
            .get(key)
            .map(|(graph, version)| VersionedGraph {
                graph: graph.clone(),
                version: Some(*version),
            })
    }

    pub async fn metadata_snapshot(&self, index: &str) -> MetadataSnapshot {
        self.state
            .lock()
            .await
            .metadata
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of operations in each metadata write call so far.
    pub async fn write_call_sizes(&self) -> Vec<usize> {
        self.state.lock().await.write_calls.clone()
    }

    /// IDs requested by each content fetch so far.
    pub async fn fetch_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().await.fetch_calls.clone()
    }

    /// Failures reported through the notifier.
    pub async fn failures(&self) -> Vec<TaskFailure> {
        self.state.lock().await.failures.clone()
    }
}

#[async_trait]
impl SiteConfigSource for MemoryStores {
    async fn load(&self, site: &str) -> Result<SiteConfig> {
        self.state
            .lock()
            .await
            .configs
            .get(site)
            .cloned()
            .ok_or_else(|| CoreError::config(format!("no configuration for site \"{site}\"")).into())
    }
}

#[async_trait]
impl TemplateSource for MemoryStores {
    async fn templates(&self, site: &str) -> Result<Arc<TemplateSet>> {
        self.state
            .lock()
            .await
            .templates
            .get(site)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("templates of site \"{site}\"")))
    }
}

#[async_trait]
impl ContentSource for MemoryStores {
    async fn fetch_entries(&self, site: &str, ids: &[String], include: u8) -> Result<ContentBatch> {
        let mut state = self.state.lock().await;
        state.fetch_calls.push(ids.to_vec());

        let no_entries = Vec::new();
        let no_assets = Vec::new();
        let entries = state.entries.get(site).unwrap_or(&no_entries);
        let assets = state.assets.get(site).unwrap_or(&no_assets);
        Ok(select_with_includes(entries, assets, ids, include))
    }

    async fn list_entries(&self, site: &str, content_type: &str) -> Result<Vec<Entry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .get(site)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.sys.content_type_id() == Some(content_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ObjectStore for MemoryStores {
    async fn put(&self, site: &str, key: &str, content_type: &str, content: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_objects.contains(key) {
            return Err(StoreError::backend(format!("write of {key} rejected")));
        }
        state.objects.insert(
            (site.to_string(), key.to_string()),
            StoredObject {
                content_type: content_type.to_string(),
                content,
            },
        );
        Ok(())
    }

    async fn delete(&self, site: &str, key: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .objects
            .remove(&(site.to_string(), key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryStores {
    async fn load(&self, key: &str) -> Result<Option<VersionedGraph>> {
        let mut state = self.state.lock().await;
        let loaded = state
            .graphs
            .get(key)
            .map(|(graph, version)| VersionedGraph {
                graph: graph.clone(),
                version: Some(*version),
            });
        if state.graph_races.remove(key) {
            let (_, version) = state.graphs.entry(key.to_string()).or_default();
            *version += 1;
        }
        Ok(loaded)
    }

    async fn save(&self, key: &str, graph: &ReferenceGraph, expected: Option<u64>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let found = state.graphs.get(key).map(|(_, version)| *version);
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        let version = found.map_or(1, |v| v + 1);
        state
            .graphs
            .insert(key.to_string(), (graph.clone(), version));
        Ok(version)
    }
}

#[async_trait]
impl MetadataStore for MemoryStores {
    async fn scan(&self, index: &str) -> Result<MetadataSnapshot> {
        Ok(self.metadata_snapshot(index).await)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<MetadataRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .metadata
            .get(index)
            .and_then(|snapshot| snapshot.get(id))
            .cloned())
    }

    async fn write_batch(&self, index: &str, ops: &[IndexOp]) -> Result<Vec<IndexOp>> {
        let mut state = self.state.lock().await;
        state.write_calls.push(ops.len());

        let rejected = state.write_failures.pop_front().unwrap_or(0).min(ops.len());
        let (applied, unprocessed) = ops.split_at(ops.len() - rejected);

        let snapshot = state.metadata.entry(index.to_string()).or_default();
        for op in applied {
            op.apply_to(snapshot);
        }
        Ok(unprocessed.to_vec())
    }
}

#[async_trait]
impl AssetFetcher for MemoryStores {
    async fn fetch(&self, file: &AssetFile) -> Result<FetchedAsset> {
        self.state
            .lock()
            .await
            .asset_files
            .get(&file.url)
            .map(|content| FetchedAsset {
                content: content.clone(),
                content_type: None,
            })
            .ok_or_else(|| StoreError::fetch(file.download_url(), "not found"))
    }
}

#[async_trait]
impl ErrorNotifier for MemoryStores {
    async fn notify(&self, failure: &TaskFailure) {
        self.state.lock().await.failures.push(failure.clone());
    }
}
