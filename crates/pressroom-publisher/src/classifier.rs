//! Event classification.
//!
//! A [`SiteEventContext`] applies one site's events, in arrival order, to its
//! reference graph and accumulates what has to happen afterwards: pages to
//! regenerate, page outputs to remove, assets to publish and asset files to
//! remove. [`SiteEventContext::finish`] hands the result to the scheduler as a
//! [`SitePlan`].

use std::collections::{BTreeMap, BTreeSet};

use pressroom_core::{Asset, ContentEvent, CoreError, Entry, EventRecord, SiteConfig, Sys};
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::{ReferenceGraph, SlugChange, VersionedGraph};

/// Errors applying an event to the graph.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Payload does not match its topic.
    #[error("malformed event payload: {0}")]
    Payload(#[from] CoreError),

    /// A page entry without a string slug.
    #[error("page entry {entry_id} has no string value in slug field \"{field}\"")]
    MissingSlug { entry_id: String, field: String },
}

/// Result type for classification.
pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Output files of a page slug to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRemoval {
    pub slug: String,

    /// Unpublished pages whose metadata goes with them. Empty when only stale
    /// files of a renamed or republished page are removed.
    pub entry_ids: BTreeSet<String>,

    /// Whether the files under `slug` are deleted. Cleared when another page
    /// is regenerated under the same slug in the batch.
    pub remove_files: bool,
}

/// Accumulated work of one site's batch.
#[derive(Debug, Clone)]
pub struct SitePlan {
    pub config: SiteConfig,
    pub graph: ReferenceGraph,

    /// Version the graph was loaded at.
    pub version: Option<u64>,

    /// Whether the graph changed and must be saved.
    pub dirty: bool,

    /// Page IDs to regenerate, sorted.
    pub regenerate: Vec<String>,
    pub page_removals: Vec<PageRemoval>,

    /// Latest payload per published asset.
    pub asset_publishes: Vec<Asset>,

    /// File names to delete, sorted.
    pub asset_removals: Vec<String>,
}

impl SitePlan {
    /// Whether the batch produced no work at all.
    pub fn is_empty(&self) -> bool {
        !self.dirty
            && self.regenerate.is_empty()
            && self.page_removals.is_empty()
            && self.asset_publishes.is_empty()
            && self.asset_removals.is_empty()
    }
}

/// Per-site state of one processing batch.
#[derive(Debug)]
pub struct SiteEventContext {
    config: SiteConfig,
    graph: ReferenceGraph,
    version: Option<u64>,
    dirty: bool,
    regenerate: BTreeSet<String>,
    /// Keyed by slug.
    page_removals: BTreeMap<String, PageRemoval>,
    /// Keyed by asset ID.
    asset_publishes: BTreeMap<String, Asset>,
    /// File name to the asset it belonged to.
    asset_removals: BTreeMap<String, String>,
}

impl SiteEventContext {
    pub fn new(config: SiteConfig, graph: VersionedGraph) -> Self {
        Self {
            config,
            graph: graph.graph,
            version: graph.version,
            dirty: false,
            regenerate: BTreeSet::new(),
            page_removals: BTreeMap::new(),
            asset_publishes: BTreeMap::new(),
            asset_removals: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn graph(&self) -> &ReferenceGraph {
        &self.graph
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Parse and apply one inbound record.
    ///
    /// Returns `false` when the topic is not handled and the record was skipped.
    pub fn apply_record(&mut self, record: &EventRecord) -> Result<bool> {
        match record.to_event()? {
            Some(event) => {
                self.apply(event)?;
                Ok(true)
            }
            None => {
                warn!(site = %self.config.site_id, topic = %record.topic, "skipping event with unknown topic");
                Ok(false)
            }
        }
    }

    /// Apply one parsed event.
    pub fn apply(&mut self, event: ContentEvent) -> Result<()> {
        debug!(
            site = %self.config.site_id,
            topic = %event.topic(),
            id = event.object_id(),
            "applying event"
        );
        match event {
            ContentEvent::EntryPublished(entry) => self.entry_published(&entry),
            ContentEvent::EntryUnpublished(sys) => {
                self.entry_unpublished(&sys);
                Ok(())
            }
            ContentEvent::AssetPublished(asset) => {
                self.asset_published(asset);
                Ok(())
            }
            ContentEvent::AssetUnpublished(sys) => {
                self.asset_unpublished(&sys);
                Ok(())
            }
        }
    }

    fn entry_published(&mut self, entry: &Entry) -> Result<()> {
        let id = entry.id();
        let content_type = entry.content_type()?;

        if self.config.is_page_type(content_type) {
            let field = &self.config.page_slug_field;
            let slug = entry
                .localized_str(field, self.config.default_locale.as_deref())
                .ok_or_else(|| ClassifyError::MissingSlug {
                    entry_id: id.to_string(),
                    field: field.clone(),
                })?;

            match self.graph.set_page(id, slug) {
                SlugChange::Unchanged => {}
                SlugChange::Added => {
                    self.dirty = true;
                    self.keep_page_metadata(id);
                }
                SlugChange::Changed(old) => {
                    self.dirty = true;
                    if !self.graph.slug_taken_by_other(id, &old) {
                        debug!(entry_id = id, old = %old, slug, "slug changed, removing stale output");
                        self.page_removals
                            .entry(old.clone())
                            .or_insert_with(|| PageRemoval {
                                slug: old,
                                entry_ids: BTreeSet::new(),
                                remove_files: true,
                            })
                            .remove_files = true;
                    }
                }
            }
        }

        for target in entry.linked_entry_ids(true) {
            if self.graph.add_referrer(target, id) {
                self.dirty = true;
            }
        }

        for page in self.graph.affected_pages(id) {
            if let Some(slug) = self.graph.page_slug(&page).map(str::to_string) {
                self.cancel_page_removal(&page, slug);
            }
            self.regenerate.insert(page);
        }
        Ok(())
    }

    /// Keep the files under `slug`, which `page` is about to regenerate.
    fn cancel_page_removal(&mut self, page: &str, slug: String) {
        let Some(removal) = self.page_removals.get_mut(&slug) else {
            return;
        };
        removal.entry_ids.remove(page);
        removal.remove_files = false;
        if removal.entry_ids.is_empty() {
            self.page_removals.remove(&slug);
        }
    }

    /// A page unpublished earlier in the batch is live again: its pending
    /// removals keep their file deletes but no longer drop its metadata.
    fn keep_page_metadata(&mut self, page: &str) {
        self.page_removals.retain(|_, removal| {
            removal.entry_ids.remove(page);
            removal.remove_files || !removal.entry_ids.is_empty()
        });
    }

    fn entry_unpublished(&mut self, sys: &Sys) {
        let id = sys.id.as_str();
        let Some(slug) = self.graph.remove_page(id) else {
            debug!(site = %self.config.site_id, entry_id = id, "unpublished entry is not a page");
            return;
        };

        self.dirty = true;
        self.regenerate.remove(id);
        self.graph.remove_referrer(id);

        let remove_files = !self.graph.slug_taken_by_other(id, &slug);
        let removal = self
            .page_removals
            .entry(slug.clone())
            .or_insert_with(|| PageRemoval {
                slug,
                entry_ids: BTreeSet::new(),
                remove_files,
            });
        removal.entry_ids.insert(id.to_string());
        removal.remove_files = remove_files;
    }

    fn asset_published(&mut self, asset: Asset) {
        let names = asset.file_names();
        for name in &names {
            self.asset_removals.remove(name);
        }
        self.graph.set_asset(asset.id(), names);
        self.dirty = true;
        self.asset_publishes.insert(asset.id().to_string(), asset);
    }

    fn asset_unpublished(&mut self, sys: &Sys) {
        let id = sys.id.as_str();
        let Some(names) = self.graph.remove_asset(id) else {
            warn!(site = %self.config.site_id, asset_id = id, "unpublished asset has no recorded file name, ignoring");
            return;
        };

        self.dirty = true;
        self.asset_publishes.remove(id);
        for name in names.names() {
            self.asset_removals.insert(name.to_string(), id.to_string());
        }
    }

    /// Consume the context into the work it accumulated.
    pub fn finish(self) -> SitePlan {
        SitePlan {
            config: self.config,
            graph: self.graph,
            version: self.version,
            dirty: self.dirty,
            regenerate: self.regenerate.into_iter().collect(),
            page_removals: self.page_removals.into_values().collect(),
            asset_publishes: self.asset_publishes.into_values().collect(),
            asset_removals: self.asset_removals.into_keys().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pressroom_core::{Link, Topic};
    use serde_json::json;

    use super::*;

    fn context() -> SiteEventContext {
        SiteEventContext::new(SiteConfig::new("blog"), VersionedGraph::default())
    }

    fn page(id: &str, slug: &str) -> Entry {
        Entry::new(id, "page").with_field("slug", slug)
    }

    fn publish(ctx: &mut SiteEventContext, entry: Entry) {
        ctx.apply(ContentEvent::EntryPublished(entry)).unwrap();
    }

    fn unpublish(ctx: &mut SiteEventContext, id: &str) {
        ctx.apply(ContentEvent::EntryUnpublished(Sys::new(id))).unwrap();
    }

    fn removal(slug: &str, entry_ids: &[&str], remove_files: bool) -> PageRemoval {
        PageRemoval {
            slug: slug.to_string(),
            entry_ids: entry_ids.iter().map(|id| id.to_string()).collect(),
            remove_files,
        }
    }

    #[test]
    fn test_page_publish_registers_and_regenerates() {
        let mut ctx = context();
        publish(&mut ctx, page("p1", "home").with_field("hero", Link::entry("m1")));

        assert!(ctx.is_dirty());
        assert_eq!(ctx.graph().page_slug("p1"), Some("home"));
        assert_eq!(ctx.graph().referrers("m1").collect::<Vec<_>>(), vec!["p1"]);

        let plan = ctx.finish();
        assert_eq!(plan.regenerate, vec!["p1"]);
        assert!(plan.page_removals.is_empty());
    }

    #[test]
    fn test_republish_unchanged_page_is_clean() {
        let mut graph = ReferenceGraph::new();
        graph.set_page("p1", "home");
        graph.add_referrer("m1", "p1");
        let mut ctx = SiteEventContext::new(
            SiteConfig::new("blog"),
            VersionedGraph { graph, version: Some(4) },
        );

        publish(&mut ctx, page("p1", "home").with_field("hero", Link::entry("m1")));
        let plan = ctx.finish();
        assert!(!plan.dirty);
        assert_eq!(plan.version, Some(4));
        assert_eq!(plan.regenerate, vec!["p1"]);
    }

    #[test]
    fn test_two_hop_propagation() {
        let mut ctx = context();
        publish(&mut ctx, page("p1", "home").with_field("body", Link::entry("m1")));
        publish(&mut ctx, Entry::new("m1", "section").with_field("child", Link::entry("n1")));
        let before = ctx.finish();
        assert_eq!(before.regenerate, vec!["p1"]);

        let mut ctx = SiteEventContext::new(
            SiteConfig::new("blog"),
            VersionedGraph { graph: before.graph, version: Some(1) },
        );
        publish(&mut ctx, Entry::new("n1", "image").with_field("file", Link::asset("a1")));
        let plan = ctx.finish();
        assert_eq!(plan.regenerate, vec!["p1"]);
        assert!(!plan.dirty);
    }

    #[test]
    fn test_localized_links_are_indexed() {
        let mut ctx = context();
        let entry = Entry::new("m1", "section").with_field(
            "related",
            json!({"en-US": {"sys": {"type": "Link", "linkType": "Entry", "id": "x1"}},
                   "de-DE": {"sys": {"type": "Link", "linkType": "Entry", "id": "x2"}}}),
        );
        publish(&mut ctx, entry);
        assert_eq!(ctx.graph().referrers("x1").collect::<Vec<_>>(), vec!["m1"]);
        assert_eq!(ctx.graph().referrers("x2").collect::<Vec<_>>(), vec!["m1"]);
    }

    #[test]
    fn test_unpublish_dominates_publish() {
        let mut ctx = context();
        publish(&mut ctx, page("p1", "home"));
        unpublish(&mut ctx, "p1");

        let plan = ctx.finish();
        assert!(plan.regenerate.is_empty());
        assert_eq!(
            plan.page_removals,
            vec![removal("home", &["p1"], true)]
        );
        assert!(!plan.graph.is_page("p1"));
    }

    #[test]
    fn test_republish_after_unpublish_cancels_removal() {
        let mut ctx = context();
        publish(&mut ctx, page("p1", "home"));
        unpublish(&mut ctx, "p1");
        publish(&mut ctx, page("p1", "home"));

        let plan = ctx.finish();
        assert_eq!(plan.regenerate, vec!["p1"]);
        assert!(plan.page_removals.is_empty());
    }

    #[test]
    fn test_unpublish_non_page_is_noop() {
        let mut ctx = context();
        unpublish(&mut ctx, "m1");
        let plan = ctx.finish();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_slug_change_removes_stale_output() {
        let mut graph = ReferenceGraph::new();
        graph.set_page("p1", "about");
        let mut ctx = SiteEventContext::new(SiteConfig::new("blog"), VersionedGraph { graph, version: Some(1) });

        publish(&mut ctx, page("p1", "about-us"));
        let plan = ctx.finish();
        assert!(plan.dirty);
        assert_eq!(plan.regenerate, vec!["p1"]);
        assert_eq!(
            plan.page_removals,
            vec![removal("about", &[], true)]
        );
    }

    #[test]
    fn test_slug_reused_by_other_page_keeps_files() {
        let mut graph = ReferenceGraph::new();
        graph.set_page("p1", "home");
        let mut ctx = SiteEventContext::new(SiteConfig::new("blog"), VersionedGraph { graph, version: Some(1) });

        unpublish(&mut ctx, "p1");
        publish(&mut ctx, page("p2", "home"));

        let plan = ctx.finish();
        assert_eq!(plan.regenerate, vec!["p2"]);
        assert_eq!(
            plan.page_removals,
            vec![removal("home", &["p1"], false)]
        );
    }

    #[test]
    fn test_republish_under_new_slug_keeps_metadata() {
        let mut graph = ReferenceGraph::new();
        graph.set_page("p1", "about");
        let mut ctx = SiteEventContext::new(SiteConfig::new("blog"), VersionedGraph { graph, version: Some(1) });

        unpublish(&mut ctx, "p1");
        publish(&mut ctx, page("p1", "about-us"));

        let plan = ctx.finish();
        assert_eq!(plan.regenerate, vec!["p1"]);
        assert_eq!(plan.page_removals, vec![removal("about", &[], true)]);
    }

    #[test]
    fn test_pages_cycling_through_one_slug_are_all_removed() {
        let mut graph = ReferenceGraph::new();
        graph.set_page("p1", "home");
        let mut ctx = SiteEventContext::new(SiteConfig::new("blog"), VersionedGraph { graph, version: Some(1) });

        unpublish(&mut ctx, "p1");
        publish(&mut ctx, page("p2", "home"));
        unpublish(&mut ctx, "p2");

        let plan = ctx.finish();
        assert!(plan.regenerate.is_empty());
        assert_eq!(plan.page_removals, vec![removal("home", &["p1", "p2"], true)]);
    }

    #[test]
    fn test_page_without_slug_fails() {
        let mut ctx = context();
        let err = ctx
            .apply(ContentEvent::EntryPublished(Entry::new("p1", "page").with_field("slug", Link::entry("x"))))
            .unwrap_err();
        assert!(matches!(err, ClassifyError::MissingSlug { .. }));
    }

    #[test]
    fn test_asset_publish_last_write_wins() {
        let mut ctx = context();
        ctx.apply(ContentEvent::AssetPublished(Asset::new("a1", "//cdn/x/old.png"))).unwrap();
        ctx.apply(ContentEvent::AssetUnpublished(Sys::new("a1"))).unwrap();
        ctx.apply(ContentEvent::AssetPublished(Asset::new("a1", "//cdn/x/new.png"))).unwrap();
        ctx.apply(ContentEvent::AssetPublished(Asset::new("a1", "//cdn/x/old.png"))).unwrap();

        let plan = ctx.finish();
        assert_eq!(plan.asset_publishes.len(), 1);
        assert_eq!(plan.asset_publishes[0].file_names(), vec!["old.png"]);
        assert!(plan.asset_removals.is_empty());
    }

    #[test]
    fn test_asset_unpublish_cancels_publish() {
        let mut ctx = context();
        ctx.apply(ContentEvent::AssetPublished(Asset::new("a1", "//cdn/x/pic.png"))).unwrap();
        ctx.apply(ContentEvent::AssetUnpublished(Sys::new("a1"))).unwrap();
        ctx.apply(ContentEvent::AssetUnpublished(Sys::new("a1"))).unwrap();

        let plan = ctx.finish();
        assert!(plan.asset_publishes.is_empty());
        assert_eq!(plan.asset_removals, vec!["pic.png"]);
        assert!(!plan.graph.assets.contains_key("a1"));
    }

    #[test]
    fn test_asset_unpublish_without_mapping_is_noop() {
        let mut ctx = context();
        ctx.apply(ContentEvent::AssetUnpublished(Sys::new("a9"))).unwrap();
        let plan = ctx.finish();
        assert!(!plan.dirty);
        assert!(plan.asset_removals.is_empty());
    }

    #[test]
    fn test_apply_record_skips_unknown_topic() {
        let mut ctx = context();
        let record = EventRecord {
            site: "blog".into(),
            topic: "ContentManagement.Entry.archive".into(),
            payload: json!({}),
        };
        assert!(!ctx.apply_record(&record).unwrap());

        let record = EventRecord::new("blog", Topic::EntryPublish, page("p1", "home")).unwrap();
        assert!(ctx.apply_record(&record).unwrap());

        let bad = EventRecord {
            site: "blog".into(),
            topic: "EntryPublish".into(),
            payload: json!({"fields": {}}),
        };
        assert!(matches!(ctx.apply_record(&bad), Err(ClassifyError::Payload(_))));
    }
}
