//! Pressroom Publisher Library
//!
//! Incremental publish pipeline: content-change events in, regenerated
//! pages, published assets and a consistent metadata index out.
//!
//! # Modules
//!
//! - [`graph`] - Reverse-link index with page and asset registries
//! - [`classifier`] - Applies events to a site's graph and collects the work they cause
//! - [`scheduler`] - Per-site ordering of events and concurrent task fan-out
//! - [`metadata`] - Metadata index records and operations
//! - [`reconcile`] - Snapshot diffing and batched application with retry
//! - [`rebuild`] - Full-site rebuild
//! - [`store`] - Storage ports with in-memory and filesystem adapters
//! - [`notify`] - Failure reporting

pub mod classifier;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod notify;
pub mod rebuild;
pub mod reconcile;
pub mod scheduler;
pub mod store;

pub use classifier::{ClassifyError, PageRemoval, SiteEventContext, SitePlan};
pub use error::{PublishError, Result};
pub use graph::{ReferenceGraph, VersionedGraph};
pub use metadata::{IndexOp, MetadataRecord, MetadataSnapshot};
pub use notify::{ErrorNotifier, FailureKind, LogNotifier, TaskFailure};
pub use rebuild::{RebuildStats, SiteRebuilder};
pub use reconcile::{ApplyStats, ReconcileError, Reconciler};
pub use scheduler::{BatchReport, Scheduler, SiteReport};
pub use store::{StoreError, Stores};
