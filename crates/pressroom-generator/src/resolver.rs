//! Link resolution over a fetched content batch.

use std::collections::HashMap;

use pressroom_core::{Asset, ContentBatch, Entry, Link, LinkType};

/// Lookup tables from ID to the entries and assets of one fetch result.
///
/// Both the requested items and the included linked objects are indexed, so a
/// page that embeds another page resolves like any other module.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    entries: HashMap<String, Entry>,
    assets: HashMap<String, Asset>,
}

impl LinkResolver {
    /// Build lookup tables from a fetch result.
    pub fn new(batch: &ContentBatch) -> Self {
        let mut resolver = Self::default();
        for entry in batch.items.iter().chain(&batch.includes.entries) {
            resolver.insert_entry(entry.clone());
        }
        for asset in &batch.includes.assets {
            resolver.insert_asset(asset.clone());
        }
        resolver
    }

    /// Add an entry, replacing any entry with the same ID.
    pub fn insert_entry(&mut self, entry: Entry) {
        self.entries.insert(entry.sys.id.clone(), entry);
    }

    /// Add an asset, replacing any asset with the same ID.
    pub fn insert_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.sys.id.clone(), asset);
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }

    /// Whether the link target is part of the batch.
    pub fn contains(&self, link: &Link) -> bool {
        match link.link_type {
            LinkType::Entry => self.entries.contains_key(&link.id),
            LinkType::Asset => self.assets.contains_key(&link.id),
        }
    }

    /// Number of indexed entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of indexed assets.
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}
