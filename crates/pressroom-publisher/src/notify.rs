//! Failure reporting.
//!
//! Isolated failures never abort a batch; they are logged and handed to an
//! [`ErrorNotifier`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

/// Scope a failure is isolated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The site's whole batch: configuration, graph load or save, malformed event.
    Site,
    /// One page, asset or removal task.
    Task,
    /// Metadata operations left unprocessed: the index and the output disagree.
    Reconcile,
}

/// An isolated failure of a site or one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub site: String,
    pub task: String,
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(
        site: impl Into<String>,
        task: impl Into<String>,
        kind: FailureKind,
        error: &dyn std::error::Error,
    ) -> Self {
        Self {
            site: site.into(),
            task: task.into(),
            kind,
            message: error_chain(error),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.site, self.task, self.message)
    }
}

/// Render an error with its sources.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Receives isolated failures.
#[async_trait]
pub trait ErrorNotifier: Send + Sync {
    async fn notify(&self, failure: &TaskFailure);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ErrorNotifier for LogNotifier {
    async fn notify(&self, failure: &TaskFailure) {
        match failure.kind {
            FailureKind::Task => warn!(
                site = %failure.site,
                task = %failure.task,
                error = %failure.message,
                "task failed"
            ),
            FailureKind::Site => error!(
                site = %failure.site,
                task = %failure.task,
                error = %failure.message,
                "site batch failed"
            ),
            FailureKind::Reconcile => error!(
                site = %failure.site,
                task = %failure.task,
                error = %failure.message,
                "metadata index out of sync with published output"
            ),
        }
    }
}
