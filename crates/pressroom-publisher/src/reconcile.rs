//! Metadata reconciliation.
//!
//! Diffs two index snapshots into put and delete operations and applies
//! operation lists in bounded batches. Operations the store reports as
//! unprocessed are resubmitted once after a backoff; anything still
//! unprocessed after that fails the reconciliation.

use std::time::{Duration, Instant};

use pressroom_core::SiteConfig;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    metadata::{IndexOp, MetadataSnapshot},
    store::{MetadataStore, StoreError},
};

/// Default number of operations per write call.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default wait before resubmitting unprocessed operations.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Store failure.
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    /// Operations still unprocessed after the retry.
    #[error("{count} metadata operations on {index} remained unprocessed after retry")]
    Unprocessed { index: String, count: usize },
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Statistics from applying an operation list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Operations submitted.
    pub operations: usize,
    /// Write calls made, retries included.
    pub write_calls: usize,
    /// Operations resubmitted after the backoff.
    pub retried: usize,
}

/// Applies operations to one metadata index.
pub struct Reconciler<'a> {
    store: &'a dyn MetadataStore,
    index: String,
    batch_size: usize,
    retry_backoff: Duration,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler with default batching.
    pub fn new(store: &'a dyn MetadataStore, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Create a reconciler for a site's index and batching settings.
    pub fn for_site(store: &'a dyn MetadataStore, config: &SiteConfig) -> Self {
        Self::new(store, config.metadata_index())
            .with_batch_size(config.metadata_batch_size)
            .with_retry_backoff(config.metadata_retry_backoff())
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Operations turning `old` into `new`.
    ///
    /// Changed or new records become puts, keys missing from `new` become
    /// deletes. Unchanged records produce nothing.
    pub fn diff(old: &MetadataSnapshot, new: &MetadataSnapshot) -> Vec<IndexOp> {
        let puts = new
            .iter()
            .filter(|(id, record)| old.get(*id) != Some(*record))
            .map(|(id, record)| IndexOp::Put {
                id: id.clone(),
                record: record.clone(),
            });
        let deletes = old
            .keys()
            .filter(|id| !new.contains_key(*id))
            .map(|id| IndexOp::Delete { id: id.clone() });
        puts.chain(deletes).collect()
    }

    /// Apply operations in batches, retrying unprocessed ones once.
    pub async fn apply(&self, ops: Vec<IndexOp>) -> Result<ApplyStats> {
        let mut stats = ApplyStats {
            operations: ops.len(),
            ..ApplyStats::default()
        };
        if ops.is_empty() {
            return Ok(stats);
        }

        let unprocessed = self.submit(&ops, &mut stats).await?;
        if unprocessed.is_empty() {
            return Ok(stats);
        }

        warn!(
            index = %self.index,
            count = unprocessed.len(),
            backoff_ms = self.retry_backoff.as_millis() as u64,
            "metadata operations unprocessed, retrying"
        );
        tokio::time::sleep(self.retry_backoff).await;

        stats.retried = unprocessed.len();
        let remaining = self.submit(&unprocessed, &mut stats).await?;
        if !remaining.is_empty() {
            error!(index = %self.index, count = remaining.len(), "metadata operations failed after retry");
            return Err(ReconcileError::Unprocessed {
                index: self.index.clone(),
                count: remaining.len(),
            });
        }

        Ok(stats)
    }

    /// Diff the stored index against `new` and apply the difference.
    pub async fn reconcile(&self, new: &MetadataSnapshot) -> Result<ApplyStats> {
        let start = Instant::now();
        let old = self.store.scan(&self.index).await?;
        let ops = Self::diff(&old, new);
        info!(index = %self.index, old = old.len(), new = new.len(), operations = ops.len(), "reconciling metadata");

        let stats = self.apply(ops).await?;
        info!(
            index = %self.index,
            write_calls = stats.write_calls,
            duration_ms = start.elapsed().as_millis() as u64,
            "metadata reconciled"
        );
        Ok(stats)
    }

    async fn submit(&self, ops: &[IndexOp], stats: &mut ApplyStats) -> Result<Vec<IndexOp>> {
        let mut unprocessed = Vec::new();
        for chunk in ops.chunks(self.batch_size) {
            stats.write_calls += 1;
            let rejected = self.store.write_batch(&self.index, chunk).await?;
            debug!(index = %self.index, submitted = chunk.len(), unprocessed = rejected.len(), "metadata batch written");
            unprocessed.extend(rejected);
        }
        Ok(unprocessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::MetadataRecord, store::memory::MemoryStores};

    fn snapshot(records: &[(&str, MetadataRecord)]) -> MetadataSnapshot {
        records
            .iter()
            .map(|(id, record)| (id.to_string(), record.clone()))
            .collect()
    }

    #[test]
    fn test_diff_puts_and_deletes() {
        let old = snapshot(&[
            ("p1", MetadataRecord::page(["home.html"], ["m1"])),
            ("m1", MetadataRecord::used_by(["p1"])),
            ("gone", MetadataRecord::used_by(["p1"])),
        ]);
        let new = snapshot(&[
            ("p1", MetadataRecord::page(["home.html"], ["m1", "m2"])),
            ("m1", MetadataRecord::used_by(["p1"])),
            ("m2", MetadataRecord::used_by(["p1"])),
        ]);

        let ops = Reconciler::diff(&old, &new);
        assert_eq!(
            ops,
            vec![
                IndexOp::Put {
                    id: "m2".into(),
                    record: MetadataRecord::used_by(["p1"])
                },
                IndexOp::Put {
                    id: "p1".into(),
                    record: MetadataRecord::page(["home.html"], ["m1", "m2"])
                },
                IndexOp::Delete { id: "gone".into() },
            ]
        );
    }

    #[test]
    fn test_diff_is_idempotent() {
        let old = snapshot(&[("p1", MetadataRecord::page(["a.html"], ["x"]))]);
        let new = snapshot(&[
            ("p1", MetadataRecord::page(["a.html"], ["x", "y"])),
            ("x", MetadataRecord::used_by(["p1"])),
        ]);

        let mut applied = old.clone();
        for op in Reconciler::diff(&old, &new) {
            op.apply_to(&mut applied);
        }
        assert_eq!(applied, new);
        assert!(Reconciler::diff(&new, &new).is_empty());
        assert!(Reconciler::diff(&applied, &new).is_empty());
    }

    #[tokio::test]
    async fn test_apply_splits_batches_and_retries_once() {
        let stores = MemoryStores::new();
        stores.fail_next_writes([3]).await;
        let reconciler = Reconciler::new(&stores, "blog-site-meta")
            .with_batch_size(25)
            .with_retry_backoff(Duration::ZERO);

        let new: MetadataSnapshot = (0..30)
            .map(|i| (format!("e{i:02}"), MetadataRecord::used_by(["p1"])))
            .collect();

        let stats = reconciler.reconcile(&new).await.unwrap();
        assert_eq!(stats.operations, 30);
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.write_calls, 3);
        assert_eq!(stores.write_call_sizes().await, vec![25, 5, 3]);
        assert_eq!(stores.metadata_snapshot("blog-site-meta").await, new);
    }

    #[tokio::test]
    async fn test_apply_fails_when_retry_is_unprocessed() {
        let stores = MemoryStores::new();
        stores.fail_next_writes([3, 0, 2]).await;
        let reconciler = Reconciler::new(&stores, "blog-site-meta")
            .with_batch_size(25)
            .with_retry_backoff(Duration::ZERO);

        let ops: Vec<IndexOp> = (0..30)
            .map(|i| IndexOp::AddPageRef {
                id: format!("e{i}"),
                page_id: "p1".into(),
            })
            .collect();

        let err = reconciler.apply(ops).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Unprocessed { count: 2, .. }));
        assert_eq!(stores.write_call_sizes().await, vec![25, 5, 3]);
    }

    #[tokio::test]
    async fn test_apply_empty_makes_no_calls() {
        let stores = MemoryStores::new();
        let reconciler = Reconciler::new(&stores, "idx");
        let stats = reconciler.apply(Vec::new()).await.unwrap();
        assert_eq!(stats, ApplyStats::default());
        assert!(stores.write_call_sizes().await.is_empty());
    }
}
