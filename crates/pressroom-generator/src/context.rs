//! Template rendering context.
//!
//! Binds a site's templates to the helpers pages call while rendering:
//!
//! - `module` renders a linked entry with the template of its own content type
//! - `assetSrc` resolves an asset link to its published or upstream URL
//! - `markdown` converts marked-up text, rewriting image sources like `assetSrc`
//! - `richText` renders a structured rich-text document

use std::cell::RefCell;

use pressroom_core::{Entry, FieldValue, Link, LinkType, SiteConfig, content::published_name};
use tracing::trace;

use crate::{
    compiler::{CompileError, Result},
    markdown::MarkdownRenderer,
    resolver::LinkResolver,
    rich_text::{self, Embeds, RichTextNode},
    template::{HelperError, Helpers, Template, TemplateData, TemplateError, TemplateSet},
};

/// Rendering context for one output extension.
#[derive(Debug)]
pub struct RenderContext<'a> {
    config: &'a SiteConfig,
    templates: &'a TemplateSet,
    resolver: &'a LinkResolver,
    extension: &'a str,
    direct_assets: bool,
    markdown: MarkdownRenderer,
    /// Entries currently being rendered, outermost first.
    active: RefCell<Vec<String>>,
}

impl<'a> RenderContext<'a> {
    /// Create a context rendering into `extension`.
    pub fn new(
        config: &'a SiteConfig,
        templates: &'a TemplateSet,
        resolver: &'a LinkResolver,
        extension: &'a str,
    ) -> Self {
        Self {
            config,
            templates,
            resolver,
            extension,
            direct_assets: config.direct_assets,
            markdown: MarkdownRenderer::new(),
            active: RefCell::new(Vec::new()),
        }
    }

    /// Override the direct-assets mode of the site configuration.
    #[must_use]
    pub fn with_direct_assets(mut self, direct_assets: bool) -> Self {
        self.direct_assets = direct_assets;
        self
    }

    /// Output extension this context renders.
    pub fn extension(&self) -> &str {
        self.extension
    }

    /// Render an entry through a template, resolving helper calls.
    pub fn render_entry(&self, entry: &Entry, template: &Template) -> Result<String> {
        if self.active.borrow().iter().any(|id| id == entry.id()) {
            return Err(CompileError::ModuleCycle(entry.id().to_string()));
        }

        self.active.borrow_mut().push(entry.id().to_string());
        let rendered = template.render(&TemplateData::new(&entry.fields, &entry.sys), self);
        self.active.borrow_mut().pop();

        rendered.map_err(unwrap_helper_error)
    }

    /// Render a linked entry as an embedded module.
    pub fn module(&self, link: &Link) -> Result<String> {
        if link.link_type != LinkType::Entry {
            return Err(CompileError::InvalidLink {
                helper: "module",
                expected: LinkType::Entry,
            });
        }

        let entry = self
            .resolver
            .entry(&link.id)
            .ok_or_else(|| CompileError::unresolved(link))?;
        let content_type = entry.content_type()?;
        let template = self.templates.get(self.extension, content_type).ok_or_else(|| {
            CompileError::NoModuleTemplate {
                extension: self.extension.to_string(),
                content_type: content_type.to_string(),
            }
        })?;

        trace!(entry_id = %link.id, content_type, "rendering module");
        self.render_entry(entry, template)
    }

    /// Resolve the URL an asset link is rendered as.
    pub fn asset_src(&self, link: &Link) -> Result<String> {
        if link.link_type != LinkType::Asset {
            return Err(CompileError::InvalidLink {
                helper: "assetSrc",
                expected: LinkType::Asset,
            });
        }

        let asset = self
            .resolver
            .asset(&link.id)
            .ok_or_else(|| CompileError::unresolved(link))?;
        let file = asset
            .primary_file(self.config.default_locale.as_deref())
            .ok_or_else(|| CompileError::AssetWithoutFile(link.id.clone()))?;

        Ok(self.rewrite_asset_url(&file.url))
    }

    /// Apply the asset rule to an upstream URL.
    pub fn rewrite_asset_url(&self, url: &str) -> String {
        if self.direct_assets {
            url.to_string()
        } else {
            self.config.asset_url(published_name(url))
        }
    }

    /// Convert markdown text to HTML.
    pub fn markdown(&self, source: &str) -> String {
        self.markdown
            .render(source, |url| self.rewrite_asset_url(url))
    }

    /// Render a rich-text document field.
    pub fn rich_text(&self, value: &FieldValue) -> Result<String> {
        let document = RichTextNode::from_field(value)
            .map_err(|e| CompileError::InvalidArgument {
                helper: "richText",
                message: e.to_string(),
            })?;
        rich_text::render(&document, self)
    }

    fn call_helper(&self, name: &str, arg: Option<&FieldValue>) -> Result<String> {
        match name {
            "module" => match arg {
                None => Ok(String::new()),
                Some(FieldValue::Link(link)) => self.module(link),
                Some(_) => Err(CompileError::InvalidLink {
                    helper: "module",
                    expected: LinkType::Entry,
                }),
            },
            "assetSrc" => match arg {
                Some(FieldValue::Link(link)) => self.asset_src(link),
                _ => Err(CompileError::InvalidLink {
                    helper: "assetSrc",
                    expected: LinkType::Asset,
                }),
            },
            "markdown" => match arg {
                None => Ok(String::new()),
                Some(value) => value.as_str().map(|s| self.markdown(s)).ok_or_else(|| {
                    CompileError::InvalidArgument {
                        helper: "markdown",
                        message: "expected a text field".to_string(),
                    }
                }),
            },
            "richText" => match arg {
                None => Ok(String::new()),
                Some(value) => self.rich_text(value),
            },
            other => Err(CompileError::UnknownHelper(other.to_string())),
        }
    }
}

impl Helpers for RenderContext<'_> {
    fn call(&self, name: &str, arg: Option<&FieldValue>) -> std::result::Result<String, HelperError> {
        self.call_helper(name, arg).map_err(|e| Box::new(e) as HelperError)
    }
}

impl Embeds for RenderContext<'_> {
    type Error = CompileError;

    fn embedded_entry(&self, link: &Link) -> Result<String> {
        self.module(link)
    }

    fn asset_source(&self, link: &Link) -> Result<String> {
        self.asset_src(link)
    }
}

/// Recover the typed compile error a helper raised inside a template.
fn unwrap_helper_error(err: TemplateError) -> CompileError {
    match err {
        TemplateError::Helper { name, source } => match source.downcast::<CompileError>() {
            Ok(compile) => *compile,
            Err(source) => CompileError::Template(TemplateError::Helper { name, source }),
        },
        other => CompileError::Template(other),
    }
}
