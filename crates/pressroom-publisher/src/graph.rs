//! Reference graph: reverse links, page registry and asset registry of a site.
//!
//! Persisted as
//!
//! ```json
//! {
//!   "refsMap": {"<entryId>": ["<referrerId>", ...]},
//!   "topEntries": {"<pageId>": "<slug>"},
//!   "assets": {"<assetId>": "<fileName>" | ["<fileName>", ...]}
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// File names published for one asset.
///
/// A single name persists as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetFileNames {
    One(String),
    Many(Vec<String>),
}

impl AssetFileNames {
    /// Build from a list of names, collapsing a single name.
    pub fn from_names(mut names: Vec<String>) -> Option<Self> {
        match names.len() {
            0 => None,
            1 => names.pop().map(Self::One),
            _ => Some(Self::Many(names)),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Reverse-link index plus page and asset registries of one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGraph {
    /// Entry ID to the IDs of entries linking to it.
    #[serde(default)]
    pub refs_map: BTreeMap<String, BTreeSet<String>>,

    /// Published page ID to its slug.
    #[serde(default)]
    pub top_entries: BTreeMap<String, String>,

    /// Asset ID to its published file names.
    #[serde(default)]
    pub assets: BTreeMap<String, AssetFileNames>,
}

impl ReferenceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `referrer` as linking to `target`. Returns whether it was new.
    pub fn add_referrer(&mut self, target: &str, referrer: &str) -> bool {
        self.refs_map
            .entry(target.to_string())
            .or_default()
            .insert(referrer.to_string())
    }

    /// Entries linking to `id`.
    pub fn referrers(&self, id: &str) -> impl Iterator<Item = &str> {
        self.refs_map
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Remove `referrer` from every referrer set. Returns whether anything changed.
    ///
    /// Sets left empty are dropped.
    pub fn remove_referrer(&mut self, referrer: &str) -> bool {
        let mut changed = false;
        self.refs_map.retain(|_, referrers| {
            changed |= referrers.remove(referrer);
            !referrers.is_empty()
        });
        changed
    }

    /// Slug of a registered page.
    pub fn page_slug(&self, id: &str) -> Option<&str> {
        self.top_entries.get(id).map(String::as_str)
    }

    /// Whether `id` is a registered page.
    pub fn is_page(&self, id: &str) -> bool {
        self.top_entries.contains_key(id)
    }

    /// Register a page under `slug`.
    pub fn set_page(&mut self, id: &str, slug: &str) -> SlugChange {
        match self.top_entries.insert(id.to_string(), slug.to_string()) {
            None => SlugChange::Added,
            Some(old) if old == slug => SlugChange::Unchanged,
            Some(old) => SlugChange::Changed(old),
        }
    }

    /// Unregister a page, returning its slug.
    pub fn remove_page(&mut self, id: &str) -> Option<String> {
        self.top_entries.remove(id)
    }

    /// Whether another registered page uses `slug`.
    pub fn slug_taken_by_other(&self, id: &str, slug: &str) -> bool {
        self.top_entries
            .iter()
            .any(|(page, page_slug)| page != id && page_slug == slug)
    }

    /// Record the file names of an asset, replacing earlier ones.
    pub fn set_asset(&mut self, id: &str, names: Vec<String>) -> Option<AssetFileNames> {
        match AssetFileNames::from_names(names) {
            Some(names) => self.assets.insert(id.to_string(), names),
            None => self.assets.remove(id),
        }
    }

    /// Remove an asset's file name mapping.
    pub fn remove_asset(&mut self, id: &str) -> Option<AssetFileNames> {
        self.assets.remove(id)
    }

    /// Registered pages affected by a change to `start`.
    ///
    /// Follows referrer chains from `start` with a visited set, so every page
    /// reachable through reverse links is returned once, even with cycles.
    /// `start` itself is included when it is a page. The result is sorted.
    pub fn affected_pages(&self, start: &str) -> Vec<String> {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut pending = vec![start];
        let mut pages = BTreeSet::new();

        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            if self.is_page(id) {
                pages.insert(id.to_string());
            }
            pending.extend(self.referrers(id).filter(|r| !visited.contains(r)));
        }

        pages.into_iter().collect()
    }
}

/// Outcome of registering a page slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugChange {
    Added,
    Unchanged,
    /// Slug replaced; holds the previous slug.
    Changed(String),
}

impl SlugChange {
    /// Whether the registry was modified.
    pub fn is_modified(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// A graph together with the version stamp it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedGraph {
    pub graph: ReferenceGraph,

    /// `None` when the graph has never been persisted.
    pub version: Option<u64>,
}
