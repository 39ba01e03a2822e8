//! Site task scheduling.
//!
//! A batch of event records is split by site. Sites run concurrently and
//! independently. Within a site, events are applied to the reference graph
//! one at a time in arrival order; only then is the accumulated work fanned
//! out as concurrent tasks. A failing task is reported and never stops its
//! siblings, and a failing site never stops other sites.

use std::{future::Future, sync::Arc, time::Instant};

use futures::future::join_all;
use pressroom_core::{Asset, ContentBatch, EventRecord, SiteConfig};
use pressroom_generator::{LinkResolver, PageCompiler, TemplateSet, mime::content_type_for};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    classifier::{PageRemoval, SiteEventContext, SitePlan},
    error::Result,
    metadata::{page_publish_ops, page_removal_ops},
    notify::{FailureKind, TaskFailure},
    reconcile::Reconciler,
    store::Stores,
};

/// What a site's batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteReport {
    pub site: String,

    /// Records received for the site.
    pub events: usize,

    /// Records with an unhandled topic.
    pub skipped_events: usize,

    /// Page IDs whose output was written.
    pub pages_published: Vec<String>,

    /// Slugs whose output was removed.
    pub pages_removed: Vec<String>,

    /// Queued pages missing from the content fetch.
    pub pages_skipped: Vec<String>,

    pub assets_published: Vec<String>,

    /// Asset file names removed.
    pub assets_removed: Vec<String>,

    /// Version the reference graph was saved at, when it changed.
    pub graph_version: Option<u64>,

    pub failures: Vec<TaskFailure>,

    pub duration_ms: u64,
}

impl SiteReport {
    fn new(site: &str, events: usize) -> Self {
        Self {
            site: site.to_string(),
            events,
            ..Self::default()
        }
    }

    fn record(&mut self, done: TaskDone) {
        match done {
            TaskDone::Page(id) => self.pages_published.push(id),
            TaskDone::PageSkipped(id) => self.pages_skipped.push(id),
            TaskDone::PageRemoved(slug) => self.pages_removed.push(slug),
            TaskDone::Asset(id) => self.assets_published.push(id),
            TaskDone::AssetFileRemoved(name) => self.assets_removed.push(name),
            TaskDone::Graph(version) => self.graph_version = Some(version),
        }
    }
}

/// What a whole batch did, one report per site in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sites: Vec<SiteReport>,
}

impl BatchReport {
    pub fn site(&self, site: &str) -> Option<&SiteReport> {
        self.sites.iter().find(|s| s.site == site)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskFailure> {
        self.sites.iter().flat_map(|s| s.failures.iter())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

enum TaskDone {
    Page(String),
    PageSkipped(String),
    PageRemoved(String),
    Asset(String),
    AssetFileRemoved(String),
    Graph(u64),
}

struct TaskOutcome {
    task: String,
    result: Result<TaskDone>,
}

/// Runs event batches against a set of stores.
#[derive(Debug, Clone)]
pub struct Scheduler {
    stores: Stores,
}

impl Scheduler {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Process one batch of event records.
    ///
    /// Always completes. Failures are isolated to their site or task, handed
    /// to the notifier and listed in the report.
    pub async fn process(&self, records: &[EventRecord]) -> BatchReport {
        let start = Instant::now();
        let groups = group_by_site(records);
        info!(records = records.len(), sites = groups.len(), "processing batch");

        let sites = join_all(
            groups
                .into_iter()
                .map(|(site, records)| self.process_site(site, records)),
        )
        .await;
        let report = BatchReport { sites };

        for failure in report.failures() {
            self.stores.notifier.notify(failure).await;
        }

        info!(
            sites = report.sites.len(),
            failures = report.failures().count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch complete"
        );
        report
    }

    async fn process_site(&self, site: &str, records: Vec<&EventRecord>) -> SiteReport {
        let start = Instant::now();
        let mut report = SiteReport::new(site, records.len());

        let (plan, templates) = match self.prepare(site, &records, &mut report).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(site, error = %e, "site batch aborted");
                report
                    .failures
                    .push(TaskFailure::new(site, "apply events", FailureKind::Site, &e));
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };

        info!(
            site,
            regenerate = plan.regenerate.len(),
            page_removals = plan.page_removals.len(),
            asset_publishes = plan.asset_publishes.len(),
            asset_removals = plan.asset_removals.len(),
            dirty = plan.dirty,
            "site events applied"
        );

        for outcome in self.run_tasks(&plan, &templates).await {
            match outcome.result {
                Ok(done) => report.record(done),
                Err(e) => {
                    let kind = e.failure_kind();
                    report
                        .failures
                        .push(TaskFailure::new(site, outcome.task, kind, &e));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            site,
            published = report.pages_published.len(),
            removed = report.pages_removed.len(),
            failures = report.failures.len(),
            duration_ms = report.duration_ms,
            "site complete"
        );
        report
    }

    /// Graph-update phase: load the site's state and apply its events in order.
    async fn prepare(
        &self,
        site: &str,
        records: &[&EventRecord],
        report: &mut SiteReport,
    ) -> Result<(SitePlan, Arc<TemplateSet>)> {
        let config = self.stores.configs.load(site).await?;
        let templates = self.stores.templates.templates(site).await?;
        let graph = self
            .stores
            .graphs
            .load(&config.graph_key())
            .await?
            .unwrap_or_default();

        let mut ctx = SiteEventContext::new(config, graph);
        for record in records {
            if !ctx.apply_record(record)? {
                report.skipped_events += 1;
            }
        }
        Ok((ctx.finish(), templates))
    }

    /// Task-fanout phase.
    async fn run_tasks(&self, plan: &SitePlan, templates: &TemplateSet) -> Vec<TaskOutcome> {
        let config = &plan.config;
        let site = config.site_id.as_str();

        let pages = join_all(
            plan.regenerate
                .chunks(config.fetch_chunk_size.max(1))
                .map(|ids| self.regenerate_chunk(config, templates, ids)),
        );
        let page_removals = join_all(plan.page_removals.iter().map(|removal| {
            timed(
                site,
                format!("remove page {}", removal.slug),
                self.remove_page(config, templates, removal),
            )
        }));
        let asset_publishes = join_all(plan.asset_publishes.iter().map(|asset| {
            timed(
                site,
                format!("publish asset {}", asset.id()),
                self.publish_asset(config, asset),
            )
        }));
        let asset_removals = join_all(plan.asset_removals.iter().map(|name| {
            timed(
                site,
                format!("remove asset file {name}"),
                self.remove_asset_file(config, name),
            )
        }));
        let graph = async {
            if plan.dirty {
                Some(timed(site, "save reference graph".to_string(), self.save_graph(plan)).await)
            } else {
                None
            }
        };

        let (pages, page_removals, asset_publishes, asset_removals, graph) =
            futures::join!(pages, page_removals, asset_publishes, asset_removals, graph);

        pages
            .into_iter()
            .flatten()
            .chain(page_removals)
            .chain(asset_publishes)
            .chain(asset_removals)
            .chain(graph)
            .collect()
    }

    /// Fetch a chunk of pages once and publish each of them.
    async fn regenerate_chunk(
        &self,
        config: &SiteConfig,
        templates: &TemplateSet,
        ids: &[String],
    ) -> Vec<TaskOutcome> {
        let site = config.site_id.as_str();
        let start = Instant::now();
        let batch = match self
            .stores
            .content
            .fetch_entries(site, ids, config.max_depth)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(site, pages = ids.len(), error = %e, "content fetch failed");
                return vec![TaskOutcome {
                    task: format!("fetch pages {}", ids.join(", ")),
                    result: Err(e.into()),
                }];
            }
        };
        debug!(
            site,
            pages = ids.len(),
            entries = batch.items.len() + batch.includes.entries.len(),
            assets = batch.includes.assets.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "fetched page content"
        );

        let resolver = LinkResolver::new(&batch);
        let compiler = PageCompiler::new(config, templates);
        join_all(ids.iter().map(|id| {
            timed(
                site,
                format!("publish page {id}"),
                self.publish_page(config, &compiler, &resolver, &batch, id),
            )
        }))
        .await
    }

    async fn publish_page(
        &self,
        config: &SiteConfig,
        compiler: &PageCompiler<'_>,
        resolver: &LinkResolver,
        batch: &ContentBatch,
        id: &str,
    ) -> Result<TaskDone> {
        let site = config.site_id.as_str();
        let Some(entry) = batch.items.iter().find(|e| e.id() == id) else {
            warn!(site, entry_id = id, "page missing from content fetch, skipping");
            return Ok(TaskDone::PageSkipped(id.to_string()));
        };

        let outputs = compiler.compile(entry, resolver)?;
        for output in &outputs {
            let key = config.output_key(&output.publish_path);
            self.stores
                .objects
                .put(site, &key, &output.content_type, output.content.clone())
                .await?;
            debug!(site, entry_id = id, path = %key, bytes = output.content.len(), "wrote page output");
        }

        let previous = self
            .stores
            .metadata
            .get(&config.metadata_index(), id)
            .await?;
        let ops = page_publish_ops(id, &outputs, previous.as_ref());
        Reconciler::for_site(self.stores.metadata.as_ref(), config)
            .apply(ops)
            .await?;

        Ok(TaskDone::Page(id.to_string()))
    }

    async fn remove_page(
        &self,
        config: &SiteConfig,
        templates: &TemplateSet,
        removal: &PageRemoval,
    ) -> Result<TaskDone> {
        let site = config.site_id.as_str();
        if removal.remove_files {
            for extension in templates.extensions() {
                let key = config.output_key(&format!("{}.{extension}", removal.slug));
                self.stores.objects.delete(site, &key).await?;
                debug!(site, path = %key, "deleted page output");
            }
        }

        for id in &removal.entry_ids {
            let previous = self
                .stores
                .metadata
                .get(&config.metadata_index(), id)
                .await?;
            Reconciler::for_site(self.stores.metadata.as_ref(), config)
                .apply(page_removal_ops(id, previous.as_ref()))
                .await?;
        }

        Ok(TaskDone::PageRemoved(removal.slug.clone()))
    }

    /// Download every file of an asset and write it under the assets folder.
    async fn publish_asset(&self, config: &SiteConfig, asset: &Asset) -> Result<TaskDone> {
        let site = config.site_id.as_str();
        let files = asset.files();
        if files.is_empty() {
            warn!(site, asset_id = asset.id(), "published asset has no file");
        }

        for file in files {
            let fetched = self.stores.assets.fetch(file).await?;
            let name = file.published_name();
            let content_type = fetched
                .content_type
                .or_else(|| file.content_type.clone())
                .unwrap_or_else(|| content_type_for(name).to_string());
            let key = config.asset_key(name);
            let bytes = fetched.content.len();
            self.stores
                .objects
                .put(site, &key, &content_type, fetched.content)
                .await?;
            debug!(site, asset_id = asset.id(), path = %key, bytes, content_type = %content_type, "wrote asset file");
        }

        Ok(TaskDone::Asset(asset.id().to_string()))
    }

    async fn remove_asset_file(&self, config: &SiteConfig, name: &str) -> Result<TaskDone> {
        let key = config.asset_key(name);
        self.stores.objects.delete(&config.site_id, &key).await?;
        Ok(TaskDone::AssetFileRemoved(name.to_string()))
    }

    async fn save_graph(&self, plan: &SitePlan) -> Result<TaskDone> {
        let version = self
            .stores
            .graphs
            .save(&plan.config.graph_key(), &plan.graph, plan.version)
            .await?;
        Ok(TaskDone::Graph(version))
    }
}

/// Split records by site, keeping arrival order within and across sites.
fn group_by_site(records: &[EventRecord]) -> Vec<(&str, Vec<&EventRecord>)> {
    let mut groups: Vec<(&str, Vec<&EventRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(site, _)| *site == record.site) {
            Some((_, group)) => group.push(record),
            None => groups.push((record.site.as_str(), vec![record])),
        }
    }
    groups
}

/// Run a task, logging its start, finish and elapsed time.
async fn timed<F>(site: &str, task: String, fut: F) -> TaskOutcome
where
    F: Future<Output = Result<TaskDone>>,
{
    let start = Instant::now();
    debug!(site, task = %task, "task started");
    let result = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(site, task = %task, duration_ms, "task finished"),
        Err(e) => warn!(site, task = %task, duration_ms, error = %e, "task failed"),
    }
    TaskOutcome { task, result }
}
