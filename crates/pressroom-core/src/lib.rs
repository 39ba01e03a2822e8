//! Pressroom Core Library
//!
//! Content model, inbound publish events, site configuration and error handling
//! shared by the Pressroom generator and publisher.

pub mod config;
pub mod content;
pub mod error;
pub mod event;

pub use config::SiteConfig;
pub use content::{Asset, AssetFile, ContentBatch, Entry, FieldValue, Includes, Link, LinkType, Sys};
pub use error::{CoreError, Result};
pub use event::{ContentEvent, EventRecord, Topic};
