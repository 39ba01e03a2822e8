//! Text template system for page and module rendering.
//!
//! A lightweight template language rather than a full engine like Handlebars:
//!
//! - `{{ name }}` inserts a field, HTML-escaped; `{{ name? }}` allows it to be missing
//! - `{{ $sys.id }}` reads the entry's system metadata
//! - `{{ helper arg }}` calls a helper with a field value and inserts its output raw
//! - `{{#each name}} ... {{/each}}` repeats a block for every list item, bound to `this`
//!
//! Templates are compiled once into a node list and rendered many times.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    path::Path,
};

use pressroom_core::{FieldValue, Sys};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Boxed error returned by helpers.
pub type HelperError = Box<dyn std::error::Error + Send + Sync>;

/// File extension of template sources on disk.
pub const TEMPLATE_FILE_EXTENSION: &str = "tmpl";

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Missing required variable.
    #[error("missing required variable: {0}")]
    MissingVariable(String),

    /// Variable holds a link, list or object and cannot be printed.
    #[error("variable has no text form: {0}")]
    NotText(String),

    /// Invalid template syntax.
    #[error("invalid template syntax in {template}: {message}")]
    InvalidSyntax { template: String, message: String },

    /// A helper call failed.
    #[error("helper \"{name}\" failed: {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },

    /// IO error while loading templates.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Named functions callable from templates.
pub trait Helpers {
    /// Call a helper with its (possibly missing) argument value.
    fn call(&self, name: &str, arg: Option<&FieldValue>) -> std::result::Result<String, HelperError>;
}

/// Helper set that rejects every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHelpers;

impl Helpers for NoHelpers {
    fn call(&self, name: &str, _arg: Option<&FieldValue>) -> std::result::Result<String, HelperError> {
        Err(format!("unknown helper \"{name}\"").into())
    }
}

/// Data a template is rendered against: an entry's fields and system metadata.
#[derive(Debug, Clone, Copy)]
pub struct TemplateData<'a> {
    fields: &'a BTreeMap<String, FieldValue>,
    sys: &'a Sys,
}

impl<'a> TemplateData<'a> {
    /// Create template data from fields and system metadata.
    pub fn new(fields: &'a BTreeMap<String, FieldValue>, sys: &'a Sys) -> Self {
        Self { fields, sys }
    }

    fn sys_value(&self, key: &str) -> Option<FieldValue> {
        match key {
            "id" => Some(FieldValue::from(self.sys.id.as_str())),
            "contentType" => self.sys.content_type_id().map(FieldValue::from),
            "type" => self.sys.kind.as_deref().map(FieldValue::from),
            "updatedAt" => self.sys.updated_at.map(|t| FieldValue::from(t.to_rfc3339())),
            "revision" => self
                .sys
                .revision
                .map(|r| FieldValue::Scalar(serde_json::Value::from(r))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var { path: String, optional: bool },
    Helper { name: String, arg: String },
    Each { path: String, body: Vec<Node> },
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Compile a template from its source text.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let nodes = parse(&name, source)?;
        Ok(Self { name, nodes })
    }

    /// Get the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template against entry data, dispatching helper calls to `helpers`.
    pub fn render(&self, data: &TemplateData<'_>, helpers: &dyn Helpers) -> Result<String> {
        let mut out = String::new();
        render_nodes(&self.nodes, data, None, helpers, &mut out)?;
        Ok(out)
    }
}

fn syntax_error(template: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::InvalidSyntax {
        template: template.to_string(),
        message: message.into(),
    }
}

fn parse(template: &str, source: &str) -> Result<Vec<Node>> {
    // Each open `{{#each}}` block keeps its path and the nodes collected before it.
    let mut stack: Vec<(String, Vec<Node>)> = Vec::new();
    let mut nodes = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            nodes.push(Node::Text(rest[..start].to_string()));
        }
        let end = rest[start..]
            .find("}}")
            .ok_or_else(|| syntax_error(template, "unclosed {{ delimiter"))?;
        let tag = rest[start + 2..start + end].trim();
        rest = &rest[start + end + 2..];

        if tag.starts_with('!') {
            continue;
        }

        if let Some(path) = tag.strip_prefix("#each") {
            let path = path.trim();
            if path.is_empty() {
                return Err(syntax_error(template, "#each needs a field name"));
            }
            stack.push((path.to_string(), std::mem::take(&mut nodes)));
        } else if tag == "/each" {
            let (path, outer) = stack
                .pop()
                .ok_or_else(|| syntax_error(template, "{{/each}} without {{#each}}"))?;
            let body = std::mem::replace(&mut nodes, outer);
            nodes.push(Node::Each { path, body });
        } else if tag.is_empty() {
            return Err(syntax_error(template, "empty tag"));
        } else if let Some((name, arg)) = tag.split_once(char::is_whitespace) {
            nodes.push(Node::Helper {
                name: name.to_string(),
                arg: arg.trim().to_string(),
            });
        } else if let Some(path) = tag.strip_suffix('?') {
            nodes.push(Node::Var {
                path: path.to_string(),
                optional: true,
            });
        } else {
            nodes.push(Node::Var {
                path: tag.to_string(),
                optional: false,
            });
        }
    }

    if !stack.is_empty() {
        return Err(syntax_error(template, "unclosed {{#each}} block"));
    }
    if !rest.is_empty() {
        nodes.push(Node::Text(rest.to_string()));
    }
    Ok(nodes)
}

fn lookup<'a>(
    path: &str,
    data: &TemplateData<'a>,
    this: Option<&'a FieldValue>,
) -> Option<Cow<'a, FieldValue>> {
    let mut segments = path.split('.');
    let head = segments.next()?;

    let mut current: Cow<'a, FieldValue> = match head {
        "this" => Cow::Borrowed(this?),
        "$sys" => Cow::Owned(data.sys_value(segments.next()?)?),
        field => Cow::Borrowed(data.fields.get(field)?),
    };

    for segment in segments {
        current = match current {
            Cow::Borrowed(FieldValue::Map(map)) => Cow::Borrowed(map.get(segment)?),
            Cow::Owned(FieldValue::Map(mut map)) => Cow::Owned(map.remove(segment)?),
            _ => return None,
        };
    }
    Some(current)
}

fn render_nodes<'a>(
    nodes: &[Node],
    data: &TemplateData<'a>,
    this: Option<&'a FieldValue>,
    helpers: &dyn Helpers,
    out: &mut String,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { path, optional } => match lookup(path, data, this) {
                Some(value) => {
                    let text = value
                        .to_text()
                        .ok_or_else(|| TemplateError::NotText(path.clone()))?;
                    out.push_str(&html_escape(&text));
                }
                None if *optional => {}
                None => return Err(TemplateError::MissingVariable(path.clone())),
            },
            Node::Helper { name, arg } => {
                let value = lookup(arg, data, this);
                let rendered = helpers
                    .call(name, value.as_deref())
                    .map_err(|source| TemplateError::Helper {
                        name: name.clone(),
                        source,
                    })?;
                out.push_str(&rendered);
            }
            Node::Each { path, body } => match lookup(path, data, this) {
                Some(Cow::Borrowed(FieldValue::List(items))) => {
                    for item in items {
                        render_nodes(body, data, Some(item), helpers, out)?;
                    }
                }
                Some(Cow::Borrowed(single)) => {
                    render_nodes(body, data, Some(single), helpers, out)?;
                }
                // Owned values come from $sys and are never lists.
                Some(Cow::Owned(_)) | None => {}
            },
        }
    }
    Ok(())
}

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Compiled templates of a site, by output extension and content type.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    by_extension: BTreeMap<String, BTreeMap<String, Template>>,
}

impl TemplateSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template for a content type and output extension.
    pub fn register(
        &mut self,
        extension: impl Into<String>,
        content_type: impl Into<String>,
        template: Template,
    ) {
        self.by_extension
            .entry(extension.into())
            .or_default()
            .insert(content_type.into(), template);
    }

    /// Compile and register a template source.
    pub fn register_source(
        &mut self,
        extension: &str,
        content_type: &str,
        source: &str,
    ) -> Result<()> {
        let template = Template::compile(format!("{extension}/{content_type}"), source)?;
        self.register(extension, content_type, template);
        Ok(())
    }

    /// Get the template for a content type in an extension.
    #[must_use]
    pub fn get(&self, extension: &str, content_type: &str) -> Option<&Template> {
        self.by_extension.get(extension)?.get(content_type)
    }

    /// All output extensions, sorted.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }

    /// Whether no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_extension.values().all(BTreeMap::is_empty)
    }

    /// Load templates laid out as `<dir>/<extension>/<contentType>.tmpl`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                TemplateError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("template walk loop")),
                )
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_FILE_EXTENSION)
            {
                continue;
            }

            let content_type = path.file_stem().and_then(|s| s.to_str());
            let extension = path
                .parent()
                .and_then(Path::file_name)
                .and_then(|s| s.to_str());
            let (Some(content_type), Some(extension)) = (content_type, extension) else {
                continue;
            };

            let source = std::fs::read_to_string(path)?;
            set.register_source(extension, content_type, &source)?;
            debug!(extension, content_type, "loaded template");
        }
        Ok(set)
    }
}
