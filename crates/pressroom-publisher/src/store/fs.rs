//! Filesystem adapters for a project directory.
//!
//! ```text
//! <project>/
//!   sites/<site>.toml                      site configurations
//!   templates/<site>/<ext>/<type>.tmpl     page and module templates
//!   content/<site>.json                    content export ({"items": [...], "includes": {"Asset": [...]}})
//!   media/<file name>                      local mirror of asset files
//!   public/<site>/...                      generated output
//!   state/<graph key>, state/<index>.json  reference graphs and metadata indexes
//! ```

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use pressroom_core::{AssetFile, ContentBatch, CoreError, Entry, SiteConfig, content::published_name};
use pressroom_generator::TemplateSet;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    AssetFetcher, ContentSource, FetchedAsset, GraphStore, MetadataStore, ObjectStore, Result,
    SiteConfigSource, StoreError, Stores, TemplateSource, select_with_includes,
};
use crate::{
    graph::{ReferenceGraph, VersionedGraph},
    metadata::{IndexOp, MetadataRecord, MetadataSnapshot},
    notify::LogNotifier,
};

/// Directory layout of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn site_config(&self, site: &str) -> PathBuf {
        self.root.join("sites").join(format!("{site}.toml"))
    }

    pub fn templates_dir(&self, site: &str) -> PathBuf {
        self.root.join("templates").join(site)
    }

    pub fn content_export(&self, site: &str) -> PathBuf {
        self.root.join("content").join(format!("{site}.json"))
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn output_dir(&self, site: &str) -> PathBuf {
        self.root.join("public").join(site)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Filesystem-backed implementations of every port, logging failures.
    pub fn stores(&self) -> Stores {
        let fs = Arc::new(FsStores::new(self.clone()));
        Stores {
            configs: fs.clone(),
            templates: fs.clone(),
            content: fs.clone(),
            objects: fs.clone(),
            graphs: fs.clone(),
            metadata: fs.clone(),
            assets: fs,
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Join a store key under `base`, rejecting keys that would leave it.
fn key_path(base: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StoreError::backend(format!("invalid object key: {key}")));
    }
    Ok(base.join(relative))
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGraph {
    version: u64,

    #[serde(flatten)]
    graph: ReferenceGraph,
}

/// Filesystem adapters over a [`ProjectLayout`].
#[derive(Debug)]
pub struct FsStores {
    layout: ProjectLayout,
    templates: Mutex<HashMap<String, Arc<TemplateSet>>>,
    /// Serializes read-modify-write cycles on state files.
    state_lock: Mutex<()>,
}

impl FsStores {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            templates: Mutex::new(HashMap::new()),
            state_lock: Mutex::new(()),
        }
    }

    fn index_path(&self, index: &str) -> Result<PathBuf> {
        key_path(&self.layout.state_dir(), &format!("{index}.json"))
    }

    async fn read_index(&self, index: &str) -> Result<MetadataSnapshot> {
        match read_optional(&self.index_path(index)?).await? {
            Some(content) => Ok(serde_json::from_slice(&content)?),
            None => Ok(MetadataSnapshot::new()),
        }
    }

    async fn read_export(&self, site: &str) -> Result<ContentBatch> {
        let path = self.layout.content_export(site);
        let content = read_optional(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.display().to_string()))?;
        serde_json::from_slice(&content)
            .map_err(|e| StoreError::from(CoreError::parse(path.clone(), e.to_string())))
    }
}

#[async_trait]
impl SiteConfigSource for FsStores {
    async fn load(&self, site: &str) -> Result<SiteConfig> {
        let path = self.layout.site_config(site);
        let config = SiteConfig::load_with_env(&path)?;
        if config.site_id != site {
            return Err(CoreError::config(format!(
                "{} configures site \"{}\", expected \"{site}\"",
                path.display(),
                config.site_id
            ))
            .into());
        }
        Ok(config)
    }
}

#[async_trait]
impl TemplateSource for FsStores {
    async fn templates(&self, site: &str) -> Result<Arc<TemplateSet>> {
        let mut cache = self.templates.lock().await;
        if let Some(templates) = cache.get(site) {
            return Ok(templates.clone());
        }

        let dir = self.layout.templates_dir(site);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(dir.display().to_string()));
        }
        let templates = Arc::new(TemplateSet::load_dir(&dir)?);
        debug!(site, dir = %dir.display(), "templates compiled");
        cache.insert(site.to_string(), templates.clone());
        Ok(templates)
    }
}

#[async_trait]
impl ContentSource for FsStores {
    async fn fetch_entries(&self, site: &str, ids: &[String], include: u8) -> Result<ContentBatch> {
        let export = self.read_export(site).await?;
        Ok(select_with_includes(
            &export.items,
            &export.includes.assets,
            ids,
            include,
        ))
    }

    async fn list_entries(&self, site: &str, content_type: &str) -> Result<Vec<Entry>> {
        let export = self.read_export(site).await?;
        Ok(export
            .items
            .into_iter()
            .filter(|e| e.sys.content_type_id() == Some(content_type))
            .collect())
    }
}

#[async_trait]
impl ObjectStore for FsStores {
    async fn put(&self, site: &str, key: &str, _content_type: &str, content: Vec<u8>) -> Result<()> {
        let path = key_path(&self.layout.output_dir(site), key)?;
        write_atomic(&path, &content).await
    }

    async fn delete(&self, site: &str, key: &str) -> Result<()> {
        let path = key_path(&self.layout.output_dir(site), key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl GraphStore for FsStores {
    async fn load(&self, key: &str) -> Result<Option<VersionedGraph>> {
        let path = key_path(&self.layout.state_dir(), key)?;
        let Some(content) = read_optional(&path).await? else {
            return Ok(None);
        };
        let persisted: PersistedGraph = serde_json::from_slice(&content)?;
        Ok(Some(VersionedGraph {
            graph: persisted.graph,
            version: Some(persisted.version),
        }))
    }

    async fn save(&self, key: &str, graph: &ReferenceGraph, expected: Option<u64>) -> Result<u64> {
        let _guard = self.state_lock.lock().await;
        let found = GraphStore::load(self, key).await?.and_then(|v| v.version);
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        let version = found.map_or(1, |v| v + 1);
        let persisted = PersistedGraph {
            version,
            graph: graph.clone(),
        };
        let path = key_path(&self.layout.state_dir(), key)?;
        write_atomic(&path, &serde_json::to_vec_pretty(&persisted)?).await?;
        Ok(version)
    }
}

#[async_trait]
impl MetadataStore for FsStores {
    async fn scan(&self, index: &str) -> Result<MetadataSnapshot> {
        self.read_index(index).await
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<MetadataRecord>> {
        Ok(self.read_index(index).await?.remove(id))
    }

    async fn write_batch(&self, index: &str, ops: &[IndexOp]) -> Result<Vec<IndexOp>> {
        let _guard = self.state_lock.lock().await;
        let mut snapshot = self.read_index(index).await?;
        for op in ops {
            op.apply_to(&mut snapshot);
        }
        write_atomic(&self.index_path(index)?, &serde_json::to_vec_pretty(&snapshot)?).await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl AssetFetcher for FsStores {
    async fn fetch(&self, file: &AssetFile) -> Result<FetchedAsset> {
        let path = key_path(&self.layout.media_dir(), published_name(&file.url))?;
        let content = read_optional(&path)
            .await?
            .ok_or_else(|| StoreError::fetch(file.download_url(), format!("{} not mirrored", path.display())))?;
        Ok(FetchedAsset {
            content,
            content_type: None,
        })
    }
}
