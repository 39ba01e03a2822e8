//! Structured rich-text document rendering.
//!
//! A document is a tree of nodes, each tagged with a `nodeType`:
//!
//! ```json
//! {"nodeType": "document", "content": [
//!   {"nodeType": "paragraph", "content": [
//!     {"nodeType": "text", "value": "Hello", "marks": [{"type": "bold"}]}
//!   ]}
//! ]}
//! ```
//!
//! Embedded entries and assets are rendered through an [`Embeds`]
//! implementation so they follow the same rules as template helpers.

use pressroom_core::{FieldValue, Link};
use serde::Deserialize;

use crate::template::html_escape;

/// Renders the objects a document embeds.
pub trait Embeds {
    type Error;

    /// Render an embedded entry as a module fragment.
    fn embedded_entry(&self, link: &Link) -> Result<String, Self::Error>;

    /// Resolve the source URL of an embedded asset.
    fn asset_source(&self, link: &Link) -> Result<String, Self::Error>;
}

/// One node of a rich-text document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichTextNode {
    pub node_type: String,

    #[serde(default)]
    pub content: Vec<RichTextNode>,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub marks: Vec<Mark>,

    #[serde(default)]
    pub data: NodeData,
}

/// Text formatting mark.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Extra data of hyperlink and embed nodes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub target: Option<Link>,
}

impl RichTextNode {
    /// Parse a document out of a field value.
    pub fn from_field(value: &FieldValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.to_json())
    }
}

/// Render a rich-text document to HTML.
pub fn render<E: Embeds>(node: &RichTextNode, embeds: &E) -> Result<String, E::Error> {
    let mut out = String::new();
    render_node(node, embeds, &mut out)?;
    Ok(out)
}

fn render_children<E: Embeds>(
    node: &RichTextNode,
    embeds: &E,
    out: &mut String,
) -> Result<(), E::Error> {
    for child in &node.content {
        render_node(child, embeds, out)?;
    }
    Ok(())
}

fn wrap<E: Embeds>(
    tag: &str,
    node: &RichTextNode,
    embeds: &E,
    out: &mut String,
) -> Result<(), E::Error> {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    render_children(node, embeds, out)?;
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
    Ok(())
}

fn render_node<E: Embeds>(
    node: &RichTextNode,
    embeds: &E,
    out: &mut String,
) -> Result<(), E::Error> {
    match node.node_type.as_str() {
        "document" => render_children(node, embeds, out)?,
        "paragraph" => wrap("p", node, embeds, out)?,
        "heading-1" => wrap("h1", node, embeds, out)?,
        "heading-2" => wrap("h2", node, embeds, out)?,
        "heading-3" => wrap("h3", node, embeds, out)?,
        "heading-4" => wrap("h4", node, embeds, out)?,
        "heading-5" => wrap("h5", node, embeds, out)?,
        "heading-6" => wrap("h6", node, embeds, out)?,
        "unordered-list" => wrap("ul", node, embeds, out)?,
        "ordered-list" => wrap("ol", node, embeds, out)?,
        "list-item" => wrap("li", node, embeds, out)?,
        "blockquote" => wrap("blockquote", node, embeds, out)?,
        "table" => wrap("table", node, embeds, out)?,
        "table-row" => wrap("tr", node, embeds, out)?,
        "table-cell" => wrap("td", node, embeds, out)?,
        "table-header-cell" => wrap("th", node, embeds, out)?,
        "hr" => out.push_str("<hr>"),
        "text" => render_text(node, out),
        "hyperlink" => {
            let uri = node.data.uri.as_deref().unwrap_or_default();
            out.push_str(&format!("<a href=\"{}\">", html_escape(uri)));
            render_children(node, embeds, out)?;
            out.push_str("</a>");
        }
        "asset-hyperlink" => match &node.data.target {
            Some(target) => {
                let src = embeds.asset_source(target)?;
                out.push_str(&format!("<a href=\"{}\">", html_escape(&src)));
                render_children(node, embeds, out)?;
                out.push_str("</a>");
            }
            None => render_children(node, embeds, out)?,
        },
        "embedded-entry-block" | "embedded-entry-inline" => {
            if let Some(target) = &node.data.target {
                out.push_str(&embeds.embedded_entry(target)?);
            }
        }
        "embedded-asset-block" => {
            if let Some(target) = &node.data.target {
                let src = embeds.asset_source(target)?;
                out.push_str(&format!("<img src=\"{}\">", html_escape(&src)));
            }
        }
        // entry-hyperlink and unknown node types keep their text only
        _ => render_children(node, embeds, out)?,
    }
    Ok(())
}

fn render_text(node: &RichTextNode, out: &mut String) {
    let mut text = html_escape(node.value.as_deref().unwrap_or_default());
    for mark in &node.marks {
        let tag = match mark.kind.as_str() {
            "bold" => "strong",
            "italic" => "em",
            "underline" => "u",
            "code" => "code",
            "superscript" => "sup",
            "subscript" => "sub",
            _ => continue,
        };
        text = format!("<{tag}>{text}</{tag}>");
    }
    out.push_str(&text);
}
