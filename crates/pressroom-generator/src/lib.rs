//! Pressroom Generator Library
//!
//! Page compilation engine for Pressroom.
//!
//! # Modules
//!
//! - [`template`] - Compiled text templates with helper calls
//! - [`resolver`] - ID lookup over a fetched content batch
//! - [`context`] - Template helpers bound to a site and a content batch
//! - [`markdown`] - Markdown to HTML with image source rewriting
//! - [`rich_text`] - Structured rich-text documents to HTML
//! - [`compiler`] - Page compilation and dependency collection
//! - [`mime`] - Content types by extension

pub mod compiler;
pub mod context;
pub mod markdown;
pub mod mime;
pub mod resolver;
pub mod rich_text;
pub mod template;

pub use compiler::{CompileError, PageCompiler, PageOutput, involved_entry_ids};
pub use context::RenderContext;
pub use resolver::LinkResolver;
pub use template::{Template, TemplateError, TemplateSet};
