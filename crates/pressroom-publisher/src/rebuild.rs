//! Full-site rebuild.
//!
//! Regenerates every page of a site from scratch and reconciles the complete
//! metadata index against the stored one. Unlike incremental processing, any
//! page failure fails the rebuild.

use std::{collections::HashMap, time::Instant};

use pressroom_core::{Entry, SiteConfig};
use pressroom_generator::{CompileError, LinkResolver, PageCompiler, PageOutput, TemplateSet};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::{PublishError, Result},
    metadata::snapshot_from_outputs,
    reconcile::{ApplyStats, Reconciler},
    store::{StoreError, Stores},
};

/// Rebuild statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub pages: usize,
    pub outputs: usize,
    pub metadata_records: usize,
    pub metadata_operations: usize,
    pub duration_ms: u64,
}

/// Rebuilds whole sites.
#[derive(Debug, Clone)]
pub struct SiteRebuilder {
    stores: Stores,
}

impl SiteRebuilder {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Compile and write every page of `site`, then reconcile its metadata index.
    pub async fn rebuild(&self, site: &str) -> Result<RebuildStats> {
        let start = Instant::now();
        let config = self.stores.configs.load(site).await?;
        let templates = self.stores.templates.templates(site).await?;

        let pages = self.list_pages(&config).await?;
        let ids = check_slugs(&config, &templates, &pages)?;
        info!(site, pages = ids.len(), "rebuilding site");

        let mut outputs = Vec::new();
        for chunk in ids.chunks(config.fetch_chunk_size.max(1)) {
            outputs.extend(self.compile_chunk(&config, &templates, chunk).await?);
        }

        for output in &outputs {
            let key = config.output_key(&output.publish_path);
            self.stores
                .objects
                .put(site, &key, &output.content_type, output.content.clone())
                .await?;
            debug!(site, path = %key, "wrote page output");
        }

        let snapshot = snapshot_from_outputs(&outputs);
        let ApplyStats { operations, .. } =
            Reconciler::for_site(self.stores.metadata.as_ref(), &config)
                .reconcile(&snapshot)
                .await?;

        let stats = RebuildStats {
            pages: ids.len(),
            outputs: outputs.len(),
            metadata_records: snapshot.len(),
            metadata_operations: operations,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            site,
            pages = stats.pages,
            outputs = stats.outputs,
            metadata_operations = stats.metadata_operations,
            duration_ms = stats.duration_ms,
            "site rebuilt"
        );
        Ok(stats)
    }

    async fn list_pages(&self, config: &SiteConfig) -> Result<Vec<Entry>> {
        let mut pages = Vec::new();
        for content_type in &config.page_content_types {
            let entries = self
                .stores
                .content
                .list_entries(&config.site_id, content_type)
                .await?;
            debug!(site = %config.site_id, content_type, count = entries.len(), "listed pages");
            pages.extend(entries);
        }
        Ok(pages)
    }

    async fn compile_chunk(
        &self,
        config: &SiteConfig,
        templates: &TemplateSet,
        ids: &[String],
    ) -> Result<Vec<PageOutput>> {
        let batch = self
            .stores
            .content
            .fetch_entries(&config.site_id, ids, config.max_depth)
            .await?;

        let entries = ids
            .iter()
            .map(|id| {
                batch
                    .items
                    .iter()
                    .find(|e| e.id() == id)
                    .ok_or_else(|| StoreError::NotFound(format!("page entry {id}")))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let resolver = LinkResolver::new(&batch);
        let compiler = PageCompiler::new(config, templates);
        let compiled = entries
            .par_iter()
            .map(|entry| compiler.compile(entry, &resolver))
            .collect::<std::result::Result<Vec<_>, CompileError>>()?;

        Ok(compiled.into_iter().flatten().collect())
    }
}

/// Page IDs in a stable order, after checking every page has a unique slug.
fn check_slugs(config: &SiteConfig, templates: &TemplateSet, pages: &[Entry]) -> Result<Vec<String>> {
    let compiler = PageCompiler::new(config, templates);
    let mut owners: HashMap<&str, &str> = HashMap::new();

    for page in pages {
        let slug = compiler.slug(page)?;
        if let Some(first) = owners.insert(slug, page.id()) {
            return Err(PublishError::DuplicateSlug {
                slug: slug.to_string(),
                first: first.to_string(),
                second: page.id().to_string(),
            });
        }
    }

    let mut ids: Vec<String> = pages.iter().map(|p| p.id().to_string()).collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}
