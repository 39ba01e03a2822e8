//! Metadata index records and operations.
//!
//! The index holds one record per ID. A page record carries the paths the page
//! is published at and the entries it used; an entry or asset record carries
//! the pages currently using it. An ID can hold both when one page embeds
//! another.

use std::collections::{BTreeMap, BTreeSet};

use pressroom_generator::PageOutput;
use serde::{Deserialize, Serialize};

/// One metadata index record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Paths a page is published at, one per output extension.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub publish_paths: BTreeSet<String>,

    /// Entries and assets a page used when it was last compiled.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub used_entry_ids: BTreeSet<String>,

    /// Pages currently using this entry or asset.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub page_entry_ids: BTreeSet<String>,
}

impl MetadataRecord {
    /// Record of a published page.
    pub fn page<P, U>(publish_paths: P, used_entry_ids: U) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            publish_paths: publish_paths.into_iter().map(Into::into).collect(),
            used_entry_ids: used_entry_ids.into_iter().map(Into::into).collect(),
            page_entry_ids: BTreeSet::new(),
        }
    }

    /// Record of an entry or asset used by pages.
    pub fn used_by<I>(page_entry_ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            page_entry_ids: page_entry_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether the record describes a published page.
    pub fn is_page(&self) -> bool {
        !self.publish_paths.is_empty()
    }

    /// Whether the record holds nothing.
    pub fn is_empty(&self) -> bool {
        self.publish_paths.is_empty()
            && self.used_entry_ids.is_empty()
            && self.page_entry_ids.is_empty()
    }
}

/// Full contents of a metadata index, keyed by ID.
pub type MetadataSnapshot = BTreeMap<String, MetadataRecord>;

/// A write against the metadata index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IndexOp {
    /// Replace the whole record.
    Put { id: String, record: MetadataRecord },

    /// Delete the record.
    Delete { id: String },

    /// Replace a page's publish paths and used entries, keeping its page refs.
    SetPage {
        id: String,
        publish_paths: BTreeSet<String>,
        used_entry_ids: BTreeSet<String>,
    },

    /// Clear a page's publish paths and used entries, keeping its page refs
    /// and deleting the record if it ends up empty.
    ClearPage { id: String },

    /// Add a page to a record's page refs, creating the record if needed.
    AddPageRef { id: String, page_id: String },

    /// Remove a page from a record's page refs, deleting the record if it
    /// ends up empty.
    RemovePageRef { id: String, page_id: String },
}

impl IndexOp {
    /// ID of the record the operation targets.
    pub fn id(&self) -> &str {
        match self {
            Self::Put { id, .. }
            | Self::Delete { id }
            | Self::SetPage { id, .. }
            | Self::ClearPage { id }
            | Self::AddPageRef { id, .. }
            | Self::RemovePageRef { id, .. } => id,
        }
    }

    /// Apply the operation to an in-memory snapshot.
    pub fn apply_to(&self, snapshot: &mut MetadataSnapshot) {
        match self {
            Self::Put { id, record } => {
                snapshot.insert(id.clone(), record.clone());
            }
            Self::Delete { id } => {
                snapshot.remove(id);
            }
            Self::SetPage {
                id,
                publish_paths,
                used_entry_ids,
            } => {
                let record = snapshot.entry(id.clone()).or_default();
                record.publish_paths = publish_paths.clone();
                record.used_entry_ids = used_entry_ids.clone();
            }
            Self::ClearPage { id } => {
                if let Some(record) = snapshot.get_mut(id) {
                    record.publish_paths.clear();
                    record.used_entry_ids.clear();
                    if record.is_empty() {
                        snapshot.remove(id);
                    }
                }
            }
            Self::AddPageRef { id, page_id } => {
                snapshot
                    .entry(id.clone())
                    .or_default()
                    .page_entry_ids
                    .insert(page_id.clone());
            }
            Self::RemovePageRef { id, page_id } => {
                if let Some(record) = snapshot.get_mut(id) {
                    record.page_entry_ids.remove(page_id);
                    if record.is_empty() {
                        snapshot.remove(id);
                    }
                }
            }
        }
    }
}

/// Operations recording a freshly compiled page.
///
/// `previous` is the page's record before the publish; entries it used that
/// the page no longer uses lose their page ref.
pub fn page_publish_ops(
    page_id: &str,
    outputs: &[PageOutput],
    previous: Option<&MetadataRecord>,
) -> Vec<IndexOp> {
    let publish_paths: BTreeSet<String> =
        outputs.iter().map(|o| o.publish_path.clone()).collect();
    let used: BTreeSet<String> = outputs
        .iter()
        .flat_map(|o| o.involved_entry_ids.iter().cloned())
        .collect();

    let mut ops = vec![IndexOp::SetPage {
        id: page_id.to_string(),
        publish_paths,
        used_entry_ids: used.clone(),
    }];

    if let Some(previous) = previous {
        ops.extend(
            previous
                .used_entry_ids
                .difference(&used)
                .map(|id| IndexOp::RemovePageRef {
                    id: id.clone(),
                    page_id: page_id.to_string(),
                }),
        );
    }

    ops.extend(used.into_iter().map(|id| IndexOp::AddPageRef {
        id,
        page_id: page_id.to_string(),
    }));
    ops
}

/// Operations removing an unpublished page from the index.
///
/// Page refs held by the record survive when another page still embeds this
/// one.
pub fn page_removal_ops(page_id: &str, previous: Option<&MetadataRecord>) -> Vec<IndexOp> {
    let mut ops = vec![IndexOp::ClearPage {
        id: page_id.to_string(),
    }];
    if let Some(previous) = previous {
        ops.extend(
            previous
                .used_entry_ids
                .iter()
                .map(|id| IndexOp::RemovePageRef {
                    id: id.clone(),
                    page_id: page_id.to_string(),
                }),
        );
    }
    ops
}

/// Build a complete snapshot from the outputs of every page of a site.
pub fn snapshot_from_outputs<'a>(outputs: impl IntoIterator<Item = &'a PageOutput>) -> MetadataSnapshot {
    let mut snapshot = MetadataSnapshot::new();
    for output in outputs {
        let page = snapshot.entry(output.page_entry_id.clone()).or_default();
        page.publish_paths.insert(output.publish_path.clone());
        page.used_entry_ids
            .extend(output.involved_entry_ids.iter().cloned());

        for used in &output.involved_entry_ids {
            snapshot
                .entry(used.clone())
                .or_default()
                .page_entry_ids
                .insert(output.page_entry_id.clone());
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn output(page: &str, path: &str, involved: &[&str]) -> PageOutput {
        PageOutput {
            page_entry_id: page.to_string(),
            extension: path.rsplit('.').next().unwrap_or_default().to_string(),
            publish_path: path.to_string(),
            content_type: "text/html".to_string(),
            content: Vec::new(),
            involved_entry_ids: involved.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_record_serialization() {
        let page = MetadataRecord::page(["about.html"], ["m1", "a1"]);
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({"publishPaths": ["about.html"], "usedEntryIds": ["a1", "m1"]})
        );

        let entry: MetadataRecord = serde_json::from_value(json!({"pageEntryIds": ["p2", "p1"]})).unwrap();
        assert_eq!(entry, MetadataRecord::used_by(["p1", "p2"]));
        assert!(!entry.is_page());
    }

    #[test]
    fn test_set_equality_is_order_independent() {
        assert_eq!(
            MetadataRecord::page(["a.html"], ["x", "y"]),
            MetadataRecord::page(["a.html"], ["y", "x"])
        );
    }

    #[test]
    fn test_apply_ops() {
        let mut snapshot = MetadataSnapshot::new();
        IndexOp::AddPageRef { id: "m1".into(), page_id: "p1".into() }.apply_to(&mut snapshot);
        IndexOp::AddPageRef { id: "m1".into(), page_id: "p2".into() }.apply_to(&mut snapshot);
        IndexOp::RemovePageRef { id: "m1".into(), page_id: "p1".into() }.apply_to(&mut snapshot);
        assert_eq!(snapshot["m1"], MetadataRecord::used_by(["p2"]));

        IndexOp::RemovePageRef { id: "m1".into(), page_id: "p2".into() }.apply_to(&mut snapshot);
        assert!(snapshot.is_empty());

        // SetPage keeps the page refs of a page embedded by another page
        IndexOp::AddPageRef { id: "p2".into(), page_id: "p1".into() }.apply_to(&mut snapshot);
        IndexOp::SetPage {
            id: "p2".into(),
            publish_paths: ["landing.html".to_string()].into(),
            used_entry_ids: BTreeSet::new(),
        }
        .apply_to(&mut snapshot);
        assert!(snapshot["p2"].is_page());
        assert!(snapshot["p2"].page_entry_ids.contains("p1"));
    }

    #[test]
    fn test_page_publish_ops_drop_stale_refs() {
        let previous = MetadataRecord::page(["home.html"], ["m1", "m2"]);
        let outputs = vec![
            output("p1", "home.html", &["m2", "m3"]),
            output("p1", "home.json", &["m2", "m3"]),
        ];

        let ops = page_publish_ops("p1", &outputs, Some(&previous));
        assert_eq!(
            ops,
            vec![
                IndexOp::SetPage {
                    id: "p1".into(),
                    publish_paths: ["home.html".to_string(), "home.json".to_string()].into(),
                    used_entry_ids: ["m2".to_string(), "m3".to_string()].into(),
                },
                IndexOp::RemovePageRef { id: "m1".into(), page_id: "p1".into() },
                IndexOp::AddPageRef { id: "m2".into(), page_id: "p1".into() },
                IndexOp::AddPageRef { id: "m3".into(), page_id: "p1".into() },
            ]
        );
    }

    #[test]
    fn test_page_removal_ops() {
        let previous = MetadataRecord::page(["home.html"], ["m1"]);
        assert_eq!(
            page_removal_ops("p1", Some(&previous)),
            vec![
                IndexOp::ClearPage { id: "p1".into() },
                IndexOp::RemovePageRef { id: "m1".into(), page_id: "p1".into() },
            ]
        );
        assert_eq!(page_removal_ops("p1", None).len(), 1);
    }

    #[test]
    fn test_page_removal_keeps_embedding_refs() {
        // p2 is a page embedded by p1
        let mut snapshot = snapshot_from_outputs(&[
            output("p1", "home.html", &["p2"]),
            output("p2", "landing.html", &["m1"]),
        ]);
        for op in page_removal_ops("p2", snapshot.get("p2").cloned().as_ref()) {
            op.apply_to(&mut snapshot);
        }

        assert_eq!(snapshot["p2"], MetadataRecord::used_by(["p1"]));
        assert!(!snapshot.contains_key("m1"));

        for op in page_removal_ops("p1", snapshot.get("p1").cloned().as_ref()) {
            op.apply_to(&mut snapshot);
        }
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_from_outputs_is_bidirectional() {
        let outputs = vec![
            output("p1", "home.html", &["m1", "a1"]),
            output("p2", "about.html", &["m1"]),
        ];
        let snapshot = snapshot_from_outputs(&outputs);

        assert_eq!(snapshot["p1"], MetadataRecord::page(["home.html"], ["m1", "a1"]));
        assert_eq!(snapshot["m1"], MetadataRecord::used_by(["p1", "p2"]));
        assert_eq!(snapshot["a1"], MetadataRecord::used_by(["p1"]));

        for (id, record) in &snapshot {
            for used in &record.used_entry_ids {
                assert!(snapshot[used].page_entry_ids.contains(id));
            }
            for page in &record.page_entry_ids {
                assert!(snapshot[page].used_entry_ids.contains(id));
            }
        }
    }
}
