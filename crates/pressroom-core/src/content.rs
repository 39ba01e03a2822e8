//! Content model: entries, assets, links and fetched content batches.
//!
//! The shapes follow the content repository's JSON documents. Field values are
//! parsed into [`FieldValue`], which recognizes typed links wherever a
//! `{"sys": {"type": "Link", ...}}` object appears.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Kind of object a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    /// Link to another content entry.
    Entry,
    /// Link to an asset.
    Asset,
}

/// A typed reference embedded in a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "LinkWire", into = "LinkWire")]
pub struct Link {
    /// Target kind.
    pub link_type: LinkType,
    /// Target ID.
    pub id: String,
}

impl Link {
    /// Create a link to an entry.
    pub fn entry(id: impl Into<String>) -> Self {
        Self {
            link_type: LinkType::Entry,
            id: id.into(),
        }
    }

    /// Create a link to an asset.
    pub fn asset(id: impl Into<String>) -> Self {
        Self {
            link_type: LinkType::Asset,
            id: id.into(),
        }
    }

    /// Whether this is an entry link.
    pub fn is_entry(&self) -> bool {
        self.link_type == LinkType::Entry
    }
}

#[derive(Serialize, Deserialize)]
struct LinkWire {
    sys: LinkSysWire,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkSysWire {
    #[serde(rename = "type")]
    kind: LinkMarker,
    link_type: LinkType,
    id: String,
}

#[derive(Serialize, Deserialize)]
enum LinkMarker {
    Link,
}

impl From<LinkWire> for Link {
    fn from(wire: LinkWire) -> Self {
        Self {
            link_type: wire.sys.link_type,
            id: wire.sys.id,
        }
    }
}

impl From<Link> for LinkWire {
    fn from(link: Link) -> Self {
        Self {
            sys: LinkSysWire {
                kind: LinkMarker::Link,
                link_type: link.link_type,
                id: link.id,
            },
        }
    }
}

/// Value of an entry field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Reference to another entry or asset.
    Link(Link),
    /// Sequence of values.
    List(Vec<FieldValue>),
    /// Structured object: a locale map, a rich-text document, a location, ...
    Map(BTreeMap<String, FieldValue>),
    /// String, number, boolean or null.
    Scalar(serde_json::Value),
}

impl FieldValue {
    /// Get the string value, if this is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get the link, if this is a link.
    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    /// Text form used for template interpolation.
    ///
    /// Links, lists and maps have no text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Scalar(serde_json::Value::String(s)) => Some(s.clone()),
            Self::Scalar(serde_json::Value::Null) => Some(String::new()),
            Self::Scalar(other) => Some(other.to_string()),
            _ => None,
        }
    }

    /// Node type, if this is a rich-text node (`{"nodeType": ..., ...}`).
    pub fn rich_text_node_type(&self) -> Option<&str> {
        match self {
            Self::Map(map) => map.get("nodeType").and_then(FieldValue::as_str),
            _ => None,
        }
    }

    /// Collect links held by this value, its list items and the embedded
    /// entries and assets of a rich-text document.
    ///
    /// Other maps are not descended into.
    pub fn collect_links<'a>(&'a self, out: &mut Vec<&'a Link>) {
        match self {
            Self::Link(link) => out.push(link),
            Self::List(items) => {
                for item in items {
                    item.collect_links(out);
                }
            }
            Self::Map(node) => {
                let Some(node_type) = self.rich_text_node_type() else {
                    return;
                };
                if node_type.starts_with("embedded-") {
                    if let Some(Self::Map(data)) = node.get("data") {
                        if let Some(target) = data.get("target") {
                            target.collect_links(out);
                        }
                    }
                }
                if let Some(content) = node.get("content") {
                    content.collect_links(out);
                }
            }
            Self::Scalar(_) => {}
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Scalar(serde_json::Value::String(value))
    }
}

impl From<Link> for FieldValue {
    fn from(link: Link) -> Self {
        Self::Link(link)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        Self::List(items)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self::Scalar(value))
    }
}

/// Reference to an entry's content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRef {
    pub sys: ContentTypeSys,
}

/// System block of a content type reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeSys {
    pub id: String,
}

/// System metadata of an entry or asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    /// Object ID.
    pub id: String,

    /// Object kind as reported upstream (`Entry`, `Asset`, `DeletedEntry`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Content type of an entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentTypeRef>,

    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Published revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl Sys {
    /// Create a system block with only an ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            content_type: None,
            updated_at: None,
            revision: None,
        }
    }

    /// Content type ID, if present.
    pub fn content_type_id(&self) -> Option<&str> {
        self.content_type.as_ref().map(|ct| ct.sys.id.as_str())
    }
}

/// A structured content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub sys: Sys,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Entry {
    /// Create an entry of the given content type with no fields.
    pub fn new(id: impl Into<String>, content_type: impl Into<String>) -> Self {
        let mut sys = Sys::new(id);
        sys.kind = Some("Entry".to_string());
        sys.content_type = Some(ContentTypeRef {
            sys: ContentTypeSys {
                id: content_type.into(),
            },
        });
        Self {
            sys,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Entry ID.
    pub fn id(&self) -> &str {
        &self.sys.id
    }

    /// Content type ID, required for every published entry.
    pub fn content_type(&self) -> Result<&str> {
        self.sys.content_type_id().ok_or_else(|| {
            CoreError::payload(format!("entry {} has no content type", self.sys.id))
        })
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Read a string field that may be wrapped in a locale map.
    ///
    /// The preferred locale is used when present, otherwise the first locale.
    pub fn localized_str(&self, name: &str, locale: Option<&str>) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Map(locales) => {
                let value = locale
                    .and_then(|l| locales.get(l))
                    .or_else(|| locales.values().next())?;
                value.as_str()
            }
            other => other.as_str(),
        }
    }

    /// Links found in the entry's field values.
    ///
    /// With `localized`, a map-valued field other than a rich-text document is
    /// treated as a locale map and every locale variant is scanned.
    pub fn field_links(&self, localized: bool) -> Vec<&Link> {
        let mut links = Vec::new();
        for value in self.fields.values() {
            match value {
                FieldValue::Map(variants) if localized && value.rich_text_node_type().is_none() => {
                    for variant in variants.values() {
                        variant.collect_links(&mut links);
                    }
                }
                other => other.collect_links(&mut links),
            }
        }
        links
    }

    /// Distinct IDs of entries linked from the entry's field values.
    pub fn linked_entry_ids(&self, localized: bool) -> BTreeSet<&str> {
        self.field_links(localized)
            .into_iter()
            .filter(|link| link.is_entry())
            .map(|link| link.id.as_str())
            .collect()
    }
}

/// Size details of an asset file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDetails {
    #[serde(default)]
    pub size: Option<u64>,
}

/// One binary file of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    /// Upstream URL, usually protocol-relative (`//host/path/name.png`).
    pub url: String,

    /// Original upload file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Declared MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<FileDetails>,
}

impl AssetFile {
    /// Create a file reference from its upstream URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
            content_type: None,
            details: None,
        }
    }

    /// Name the file is published under: the last segment of its URL.
    pub fn published_name(&self) -> &str {
        published_name(&self.url)
    }

    /// Absolute download URL.
    pub fn download_url(&self) -> String {
        if self.url.starts_with("//") {
            format!("https:{}", self.url)
        } else {
            self.url.clone()
        }
    }
}

/// Last path segment of an asset URL.
pub fn published_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// An asset's file field: either a single file or one file per locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetFiles {
    Single(AssetFile),
    Localized(BTreeMap<String, AssetFile>),
}

/// Fields of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<FieldValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<AssetFiles>,
}

/// A binary file tracked and published alongside pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub sys: Sys,
    pub fields: AssetFields,
}

impl Asset {
    /// Create an asset with a single file.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let mut sys = Sys::new(id);
        sys.kind = Some("Asset".to_string());
        Self {
            sys,
            fields: AssetFields {
                title: None,
                file: Some(AssetFiles::Single(AssetFile::new(url))),
            },
        }
    }

    /// Asset ID.
    pub fn id(&self) -> &str {
        &self.sys.id
    }

    /// All files of the asset, one per locale when localized.
    pub fn files(&self) -> Vec<&AssetFile> {
        match &self.fields.file {
            Some(AssetFiles::Single(file)) => vec![file],
            Some(AssetFiles::Localized(files)) => files.values().collect(),
            None => Vec::new(),
        }
    }

    /// File to use when rendering a reference to the asset.
    pub fn primary_file(&self, locale: Option<&str>) -> Option<&AssetFile> {
        match self.fields.file.as_ref()? {
            AssetFiles::Single(file) => Some(file),
            AssetFiles::Localized(files) => locale
                .and_then(|l| files.get(l))
                .or_else(|| files.values().next()),
        }
    }

    /// Distinct published file names, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .files()
            .into_iter()
            .map(AssetFile::published_name)
            .filter(|name| !name.is_empty())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Objects included alongside a fetch result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Includes {
    #[serde(rename = "Entry", default)]
    pub entries: Vec<Entry>,

    #[serde(rename = "Asset", default)]
    pub assets: Vec<Asset>,
}

/// Result of one content fetch: the requested entries plus linked objects
/// included up to the requested depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBatch {
    #[serde(default)]
    pub items: Vec<Entry>,

    #[serde(default)]
    pub includes: Includes,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_link_parsing() {
        let value: FieldValue =
            serde_json::from_value(json!({"sys": {"type": "Link", "linkType": "Entry", "id": "e1"}}))
                .unwrap();
        assert_eq!(value, FieldValue::Link(Link::entry("e1")));

        let value: FieldValue =
            serde_json::from_value(json!({"sys": {"type": "Link", "linkType": "Asset", "id": "a1"}}))
                .unwrap();
        assert_eq!(value.as_link(), Some(&Link::asset("a1")));
    }

    #[test]
    fn test_non_link_objects_are_maps() {
        let value: FieldValue = serde_json::from_value(
            json!({"sys": {"type": "Link", "linkType": "ContentType", "id": "page"}}),
        )
        .unwrap();
        assert!(matches!(value, FieldValue::Map(_)));

        let value: FieldValue = serde_json::from_value(json!({"lat": 1.5, "lon": 2.0})).unwrap();
        assert!(matches!(value, FieldValue::Map(_)));
    }

    #[test]
    fn test_link_serializes_to_wire_shape() {
        let json = serde_json::to_value(FieldValue::Link(Link::entry("e1"))).unwrap();
        assert_eq!(json, json!({"sys": {"type": "Link", "linkType": "Entry", "id": "e1"}}));
    }

    #[test]
    fn test_entry_parsing() {
        let entry: Entry = serde_json::from_value(json!({
            "sys": {
                "id": "p1",
                "type": "Entry",
                "contentType": {"sys": {"type": "Link", "linkType": "ContentType", "id": "page"}},
                "updatedAt": "2024-03-01T10:00:00Z"
            },
            "fields": {
                "slug": "about",
                "modules": [
                    {"sys": {"type": "Link", "linkType": "Entry", "id": "m1"}},
                    {"sys": {"type": "Link", "linkType": "Entry", "id": "m2"}}
                ],
                "hero": {"sys": {"type": "Link", "linkType": "Asset", "id": "a1"}}
            }
        }))
        .unwrap();

        assert_eq!(entry.id(), "p1");
        assert_eq!(entry.content_type().unwrap(), "page");
        assert!(entry.sys.updated_at.is_some());
        assert_eq!(entry.field("slug").and_then(FieldValue::as_str), Some("about"));
        assert_eq!(
            entry.linked_entry_ids(false).into_iter().collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
        assert_eq!(entry.field_links(false).len(), 3);
    }

    #[test]
    fn test_localized_links_and_slug() {
        let entry: Entry = serde_json::from_value(json!({
            "sys": {"id": "p1", "contentType": {"sys": {"id": "page"}}},
            "fields": {
                "slug": {"en-US": "about", "de-DE": "ueber-uns"},
                "modules": {
                    "en-US": [{"sys": {"type": "Link", "linkType": "Entry", "id": "m1"}}],
                    "de-DE": [{"sys": {"type": "Link", "linkType": "Entry", "id": "m2"}}]
                }
            }
        }))
        .unwrap();

        assert_eq!(entry.localized_str("slug", Some("en-US")), Some("about"));
        assert_eq!(entry.localized_str("slug", Some("fr-FR")), Some("ueber-uns"));
        assert_eq!(entry.localized_str("slug", None), Some("ueber-uns"));
        assert_eq!(
            entry.linked_entry_ids(true).into_iter().collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
        assert!(entry.linked_entry_ids(false).is_empty());
    }

    #[test]
    fn test_rich_text_embeds_are_links() {
        let body = json!({
            "nodeType": "document",
            "data": {},
            "content": [
                {"nodeType": "paragraph", "data": {}, "content": [
                    {"nodeType": "entry-hyperlink", "content": [], "data": {
                        "target": {"sys": {"type": "Link", "linkType": "Entry", "id": "x1"}}
                    }}
                ]},
                {"nodeType": "embedded-entry-block", "content": [], "data": {
                    "target": {"sys": {"type": "Link", "linkType": "Entry", "id": "q1"}}
                }},
                {"nodeType": "embedded-asset-block", "content": [], "data": {
                    "target": {"sys": {"type": "Link", "linkType": "Asset", "id": "a1"}}
                }}
            ]
        });
        let entry = Entry::new("art1", "article")
            .with_field("body", body.clone())
            .with_field("location", json!({"lat": 1.5, "lon": 2.0}));
        assert_eq!(entry.field_links(false), vec![&Link::entry("q1"), &Link::asset("a1")]);
        assert_eq!(entry.linked_entry_ids(true).into_iter().collect::<Vec<_>>(), vec!["q1"]);

        let localized = Entry::new("art1", "article").with_field("body", json!({"en-US": body}));
        assert_eq!(localized.linked_entry_ids(true).into_iter().collect::<Vec<_>>(), vec!["q1"]);
    }

    #[test]
    fn test_missing_content_type() {
        let entry: Entry = serde_json::from_value(json!({"sys": {"id": "x"}})).unwrap();
        assert!(entry.content_type().is_err());
    }

    #[test]
    fn test_asset_files() {
        let asset: Asset = serde_json::from_value(json!({
            "sys": {"id": "a1", "type": "Asset"},
            "fields": {
                "file": {
                    "en-US": {"url": "//cdn.example.com/sp/a1/hash/logo.png", "fileName": "logo.png"},
                    "de-DE": {"url": "//cdn.example.com/sp/a1/hash2/logo-de.png"}
                }
            }
        }))
        .unwrap();

        assert_eq!(asset.files().len(), 2);
        assert_eq!(asset.file_names(), vec!["logo-de.png", "logo.png"]);
        let primary = asset.primary_file(Some("en-US")).unwrap();
        assert_eq!(primary.published_name(), "logo.png");
        assert_eq!(primary.download_url(), "https://cdn.example.com/sp/a1/hash/logo.png");
    }

    #[test]
    fn test_content_batch_parsing() {
        let batch: ContentBatch = serde_json::from_value(json!({
            "items": [{"sys": {"id": "p1", "contentType": {"sys": {"id": "page"}}}, "fields": {}}],
            "includes": {
                "Entry": [{"sys": {"id": "m1", "contentType": {"sys": {"id": "text"}}}, "fields": {}}],
                "Asset": [{"sys": {"id": "a1"}, "fields": {"file": {"url": "//x/y.png"}}}]
            }
        }))
        .unwrap();

        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.includes.entries.len(), 1);
        assert_eq!(batch.includes.assets[0].file_names(), vec!["y.png"]);
    }
}
