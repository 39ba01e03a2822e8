//! Site configuration management.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Upper bound for the include depth accepted by the content repository.
pub const MAX_INCLUDE_DEPTH: u8 = 10;

/// Configuration of one published site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site identifier, matched against the `site` of inbound events.
    pub site_id: String,

    /// Content types whose entries are published as pages.
    #[serde(default = "default_page_content_types")]
    pub page_content_types: Vec<String>,

    /// Name of the field holding a page's slug.
    #[serde(default = "default_page_slug_field")]
    pub page_slug_field: String,

    /// Folder that published asset files are written to.
    #[serde(default = "default_assets_folder")]
    pub assets_folder: String,

    /// Link include depth requested from the content repository.
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,

    /// Location of the metadata index. Defaults to `<site_id>-site-meta`.
    #[serde(default)]
    pub metadata_index: Option<String>,

    /// Key of the persisted reference graph. Defaults to `<site_id>-content-meta.json`.
    #[serde(default)]
    pub graph_key: Option<String>,

    /// Optional folder prefix for every generated object.
    #[serde(default)]
    pub output_prefix: Option<String>,

    /// Render asset references as upstream URLs instead of local paths.
    #[serde(default)]
    pub direct_assets: bool,

    /// Locale used to read values out of localized event payloads.
    #[serde(default)]
    pub default_locale: Option<String>,

    /// Number of page IDs per shared content fetch.
    #[serde(default = "default_fetch_chunk_size")]
    pub fetch_chunk_size: usize,

    /// Maximum number of operations per metadata write call.
    #[serde(default = "default_metadata_batch_size")]
    pub metadata_batch_size: usize,

    /// Wait before resubmitting unprocessed metadata operations (milliseconds).
    #[serde(default = "default_metadata_retry_backoff_ms")]
    pub metadata_retry_backoff_ms: u64,
}

// Default value functions
fn default_page_content_types() -> Vec<String> {
    vec!["page".to_string()]
}

fn default_page_slug_field() -> String {
    "slug".to_string()
}

fn default_assets_folder() -> String {
    "assets".to_string()
}

fn default_max_depth() -> u8 {
    3
}

fn default_fetch_chunk_size() -> usize {
    5
}

fn default_metadata_batch_size() -> usize {
    25
}

fn default_metadata_retry_backoff_ms() -> u64 {
    5000
}

impl SiteConfig {
    /// Create a configuration with defaults for everything but the site id.
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            page_content_types: default_page_content_types(),
            page_slug_field: default_page_slug_field(),
            assets_folder: default_assets_folder(),
            max_depth: default_max_depth(),
            metadata_index: None,
            graph_key: None,
            output_prefix: None,
            direct_assets: false,
            default_locale: None,
            fetch_chunk_size: default_fetch_chunk_size(),
            metadata_batch_size: default_metadata_batch_size(),
            metadata_retry_backoff_ms: default_metadata_retry_backoff_ms(),
        }
    }

    /// Load configuration from a TOML or JSON file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config: SiteConfig = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                CoreError::config_with_source(
                    format!("Failed to parse config file: {}", path.display()),
                    e,
                )
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                CoreError::config_with_source(
                    format!("Failed to parse config file: {}", path.display()),
                    e,
                )
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `PRESSROOM__*` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("PRESSROOM").separator("__"))
            .build()?;

        let config: SiteConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.site_id.is_empty() {
            return Err(CoreError::config("site_id cannot be empty"));
        }

        if self.page_content_types.is_empty() {
            return Err(CoreError::config("page_content_types cannot be empty"));
        }

        if self.page_slug_field.is_empty() {
            return Err(CoreError::config("page_slug_field cannot be empty"));
        }

        if self.max_depth > MAX_INCLUDE_DEPTH {
            return Err(CoreError::config(format!(
                "max_depth cannot exceed {MAX_INCLUDE_DEPTH}"
            )));
        }

        if self.fetch_chunk_size == 0 || self.metadata_batch_size == 0 {
            return Err(CoreError::config(
                "fetch_chunk_size and metadata_batch_size must be positive",
            ));
        }

        if self.assets_folder.trim_matches('/').is_empty() {
            tracing::warn!(
                site = %self.site_id,
                "assets_folder is empty, assets will be published at the output root"
            );
        }

        Ok(())
    }

    /// Whether entries of the content type are published as pages.
    pub fn is_page_type(&self, content_type: &str) -> bool {
        self.page_content_types.iter().any(|t| t == content_type)
    }

    /// Metadata index location for this site.
    pub fn metadata_index(&self) -> String {
        self.metadata_index
            .clone()
            .unwrap_or_else(|| format!("{}-site-meta", self.site_id))
    }

    /// Reference graph persistence key for this site.
    pub fn graph_key(&self) -> String {
        self.graph_key
            .clone()
            .unwrap_or_else(|| format!("{}-content-meta.json", self.site_id))
    }

    /// Backoff before the single retry of unprocessed metadata operations.
    pub fn metadata_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.metadata_retry_backoff_ms)
    }

    /// Object key for a generated file, honoring the output prefix.
    pub fn output_key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match self.output_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{path}"),
            _ => path.to_string(),
        }
    }

    /// Object key for a published asset file.
    pub fn asset_key(&self, file_name: &str) -> String {
        let folder = self.assets_folder.trim_matches('/');
        if folder.is_empty() {
            self.output_key(file_name)
        } else {
            self.output_key(&format!("{folder}/{file_name}"))
        }
    }

    /// Site-relative URL of a published asset file.
    pub fn asset_url(&self, file_name: &str) -> String {
        let folder = self.assets_folder.trim_matches('/');
        if folder.is_empty() {
            format!("/{file_name}")
        } else {
            format!("/{folder}/{file_name}")
        }
    }
}
