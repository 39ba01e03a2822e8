//! Error type of the publish pipeline.

use pressroom_core::CoreError;
use pressroom_generator::CompileError;
use thiserror::Error;

use crate::{
    classifier::ClassifyError,
    notify::FailureKind,
    reconcile::ReconcileError,
    store::StoreError,
};

/// Publish pipeline errors.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Two pages of a site share a slug.
    #[error("slug \"{slug}\" is used by both {first} and {second}")]
    DuplicateSlug {
        slug: String,
        first: String,
        second: String,
    },
}

impl PublishError {
    /// Scope a failure of this kind is reported at.
    ///
    /// Unprocessed metadata operations are reported distinctly, a moved graph
    /// version fails the whole site.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Reconcile(ReconcileError::Unprocessed { .. }) => FailureKind::Reconcile,
            Self::Store(StoreError::Conflict { .. }) | Self::Classify(_) => FailureKind::Site,
            _ => FailureKind::Task,
        }
    }
}

/// Result type for publish operations.
pub type Result<T> = std::result::Result<T, PublishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        let unprocessed = PublishError::from(ReconcileError::Unprocessed {
            index: "blog-site-meta".into(),
            count: 2,
        });
        assert_eq!(unprocessed.failure_kind(), FailureKind::Reconcile);

        let conflict = PublishError::from(StoreError::Conflict {
            key: "blog-content-meta.json".into(),
            expected: Some(1),
            found: Some(2),
        });
        assert_eq!(conflict.failure_kind(), FailureKind::Site);

        let missing = PublishError::from(CompileError::MissingSlug("p1".into()));
        assert_eq!(missing.failure_kind(), FailureKind::Task);
    }
}
