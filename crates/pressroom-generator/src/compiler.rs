//! Page compilation.
//!
//! Compiles one page entry into an output per extension that has a template
//! for the entry's content type, and computes the entries the output depends on.

use std::collections::{BTreeSet, HashSet};

use pressroom_core::{CoreError, Entry, Link, LinkType, SiteConfig};
use thiserror::Error;
use tracing::debug;

use crate::{
    context::RenderContext, mime::content_type_for, resolver::LinkResolver,
    template::{TemplateError, TemplateSet},
};

/// Page compilation errors. Each one is fatal to a single page only.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Slug field missing or not a string.
    #[error("page entry {0} does not have a slug or its value is not a string")]
    MissingSlug(String),

    /// No page template for the content type in any extension.
    #[error("no templates found for page type \"{content_type}\" (entry {entry_id})")]
    NoTemplate {
        entry_id: String,
        content_type: String,
    },

    /// No module template for the content type in the extension being rendered.
    #[error("no \"{extension}\" template found for module type \"{content_type}\"")]
    NoModuleTemplate {
        extension: String,
        content_type: String,
    },

    /// Linked object not part of the fetched content, usually because the
    /// include depth was exceeded.
    #[error("linked {link_type:?} id {id} is not included in the content")]
    Unresolved { link_type: LinkType, id: String },

    /// Helper called with something other than the link kind it needs.
    #[error("helper \"{helper}\" was passed an invalid {expected:?} link object")]
    InvalidLink {
        helper: &'static str,
        expected: LinkType,
    },

    /// Helper called with a value it cannot convert.
    #[error("helper \"{helper}\" was passed an invalid value: {message}")]
    InvalidArgument {
        helper: &'static str,
        message: String,
    },

    /// Template called a helper that does not exist.
    #[error("unknown helper \"{0}\"")]
    UnknownHelper(String),

    /// Asset has no file to reference.
    #[error("asset {0} has no file")]
    AssetWithoutFile(String),

    /// A module embeds itself, directly or through other modules.
    #[error("module {0} embeds itself")]
    ModuleCycle(String),

    /// Template rendering error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Malformed entry.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CompileError {
    /// Error for a link whose target is not in the fetched content.
    pub fn unresolved(link: &Link) -> Self {
        Self::Unresolved {
            link_type: link.link_type,
            id: link.id.clone(),
        }
    }
}

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// One compiled page in one output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutput {
    /// ID of the page entry.
    pub page_entry_id: String,

    /// Output extension the page was rendered for.
    pub extension: String,

    /// Object path: `{slug}.{extension}`.
    pub publish_path: String,

    /// MIME type of the content.
    pub content_type: String,

    pub content: Vec<u8>,

    /// Entries and assets the page depends on, sorted, without the page itself.
    pub involved_entry_ids: Vec<String>,
}

/// Compiles page entries against a site's templates.
#[derive(Debug, Clone, Copy)]
pub struct PageCompiler<'a> {
    config: &'a SiteConfig,
    templates: &'a TemplateSet,
    direct_assets: bool,
}

impl<'a> PageCompiler<'a> {
    /// Create a compiler using the site's direct-assets setting.
    pub fn new(config: &'a SiteConfig, templates: &'a TemplateSet) -> Self {
        Self {
            config,
            templates,
            direct_assets: config.direct_assets,
        }
    }

    /// Override the direct-assets mode.
    #[must_use]
    pub fn with_direct_assets(mut self, direct_assets: bool) -> Self {
        self.direct_assets = direct_assets;
        self
    }

    /// Read the page's slug.
    pub fn slug<'e>(&self, entry: &'e Entry) -> Result<&'e str> {
        entry
            .localized_str(&self.config.page_slug_field, self.config.default_locale.as_deref())
            .ok_or_else(|| CompileError::MissingSlug(entry.id().to_string()))
    }

    /// Compile a page entry into one output per matching extension.
    pub fn compile(&self, entry: &Entry, resolver: &LinkResolver) -> Result<Vec<PageOutput>> {
        let page_id = entry.id();
        let content_type = entry.content_type()?;
        let slug = self.slug(entry)?;
        let involved = involved_entry_ids(entry, resolver)?;

        let mut outputs = Vec::new();
        for extension in self.templates.extensions() {
            let Some(template) = self.templates.get(extension, content_type) else {
                continue;
            };

            let ctx = RenderContext::new(self.config, self.templates, resolver, extension)
                .with_direct_assets(self.direct_assets);
            let content = ctx.render_entry(entry, template)?;

            debug!(entry_id = page_id, slug, extension, bytes = content.len(), "compiled page");
            outputs.push(PageOutput {
                page_entry_id: page_id.to_string(),
                extension: extension.to_string(),
                publish_path: format!("{slug}.{extension}"),
                content_type: content_type_for(extension).to_string(),
                content: content.into_bytes(),
                involved_entry_ids: involved.clone(),
            });
        }

        if outputs.is_empty() {
            return Err(CompileError::NoTemplate {
                entry_id: page_id.to_string(),
                content_type: content_type.to_string(),
            });
        }

        Ok(outputs)
    }
}

/// Entries and assets a page transitively depends on.
///
/// Walks entry links in field values and list items, following every linked
/// entry's own fields in turn. Asset links found on the way are included but
/// not followed. The page's own ID is never part of the result.
pub fn involved_entry_ids(page: &Entry, resolver: &LinkResolver) -> Result<Vec<String>> {
    let mut involved: BTreeSet<&str> = BTreeSet::new();
    let mut visited: HashSet<&str> = HashSet::from([page.id()]);
    let mut pending: Vec<&Entry> = vec![page];

    while let Some(entry) = pending.pop() {
        for link in entry.field_links(false) {
            match link.link_type {
                LinkType::Asset => {
                    involved.insert(&link.id);
                }
                LinkType::Entry => {
                    if !visited.insert(&link.id) {
                        continue;
                    }
                    let linked = resolver
                        .entry(&link.id)
                        .ok_or_else(|| CompileError::unresolved(link))?;
                    involved.insert(&link.id);
                    pending.push(linked);
                }
            }
        }
    }

    involved.remove(page.id());
    Ok(involved.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use pressroom_core::{Asset, ContentBatch, FieldValue, Includes};

    use super::*;

    fn templates() -> TemplateSet {
        let mut set = TemplateSet::new();
        set.register_source(
            "html",
            "page",
            "<h1>{{ title }}</h1>{{#each modules}}{{ module this }}{{/each}}",
        )
        .unwrap();
        set.register_source("json", "page", "{\"id\": \"{{ $sys.id }}\"}")
            .unwrap();
        set.register_source("html", "section", "<section>{{ module child }}</section>")
            .unwrap();
        set.register_source("html", "image", "<img src=\"{{ assetSrc file }}\">")
            .unwrap();
        set
    }

    fn page() -> Entry {
        Entry::new("p1", "page")
            .with_field("slug", "about")
            .with_field("title", "About")
            .with_field(
                "modules",
                vec![
                    FieldValue::Link(Link::entry("m1")),
                    FieldValue::Link(Link::entry("n1")),
                ],
            )
    }

    fn resolver() -> LinkResolver {
        LinkResolver::new(&ContentBatch {
            items: vec![page()],
            includes: Includes {
                entries: vec![
                    Entry::new("m1", "section").with_field("child", Link::entry("n1")),
                    Entry::new("n1", "image").with_field("file", Link::asset("a1")),
                ],
                assets: vec![Asset::new("a1", "//cdn.example.com/sp/a1/h/pic.png")],
            },
        })
    }

    #[test]
    fn test_compile_per_extension() {
        let config = SiteConfig::new("blog");
        let templates = templates();
        let outputs = PageCompiler::new(&config, &templates)
            .compile(&page(), &resolver())
            .unwrap();

        assert_eq!(outputs.len(), 2);
        let html = &outputs[0];
        assert_eq!(html.publish_path, "about.html");
        assert_eq!(html.content_type, "text/html");
        assert_eq!(
            String::from_utf8(html.content.clone()).unwrap(),
            "<h1>About</h1><section><img src=\"/assets/pic.png\"></section><img src=\"/assets/pic.png\">"
        );
        assert_eq!(html.involved_entry_ids, vec!["a1", "m1", "n1"]);

        let json = &outputs[1];
        assert_eq!(json.publish_path, "about.json");
        assert_eq!(json.content_type, "application/json");
        assert_eq!(json.content, b"{\"id\": \"p1\"}".to_vec());
    }

    #[test]
    fn test_compile_direct_assets() {
        let config = SiteConfig::new("blog");
        let templates = templates();
        let outputs = PageCompiler::new(&config, &templates)
            .with_direct_assets(true)
            .compile(&page(), &resolver())
            .unwrap();
        let html = String::from_utf8(outputs[0].content.clone()).unwrap();
        assert!(html.contains("//cdn.example.com/sp/a1/h/pic.png"));
    }

    #[test]
    fn test_compile_missing_slug() {
        let config = SiteConfig::new("blog");
        let templates = templates();
        let entry = Entry::new("p2", "page").with_field("slug", FieldValue::from(serde_json::json!(42)));
        let result = PageCompiler::new(&config, &templates).compile(&entry, &resolver());
        assert!(matches!(result, Err(CompileError::MissingSlug(id)) if id == "p2"));
    }

    #[test]
    fn test_compile_no_template() {
        let config = SiteConfig::new("blog");
        let templates = templates();
        let entry = Entry::new("p3", "landing").with_field("slug", "home");
        let result = PageCompiler::new(&config, &templates).compile(&entry, &resolver());
        assert!(matches!(result, Err(CompileError::NoTemplate { .. })));
    }

    #[test]
    fn test_involved_ids_unresolved_link() {
        let entry = page().with_field("extra", Link::entry("beyond-depth"));
        let result = involved_entry_ids(&entry, &resolver());
        assert!(matches!(
            result,
            Err(CompileError::Unresolved { ref id, .. }) if id == "beyond-depth"
        ));
    }

    #[test]
    fn test_involved_ids_cycle_and_order() {
        let mut resolver = resolver();
        resolver.insert_entry(Entry::new("c1", "section").with_field("child", Link::entry("c2")));
        resolver.insert_entry(
            Entry::new("c2", "section")
                .with_field("child", Link::entry("c1"))
                .with_field("back", Link::entry("p1")),
        );

        let forward = Entry::new("p1", "page")
            .with_field("a", Link::entry("c1"))
            .with_field("b", Link::entry("m1"));
        let reversed = Entry::new("p1", "page")
            .with_field("a", Link::entry("m1"))
            .with_field("b", Link::entry("c1"));

        let ids = involved_entry_ids(&forward, &resolver).unwrap();
        assert_eq!(ids, vec!["a1", "c1", "c2", "m1", "n1"]);
        assert_eq!(involved_entry_ids(&reversed, &resolver).unwrap(), ids);
    }
}
