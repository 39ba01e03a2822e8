//! Pressroom CLI Library
//!
//! Command implementations for the `pressroom` binary. Every command works on
//! a project directory through the filesystem adapters of
//! [`pressroom_publisher::store::fs`].
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (process, rebuild, reconcile)
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use pressroom::cmd;
//!
//! # async fn example() -> color_eyre::eyre::Result<()> {
//! cmd::process::run(Path::new("."), Path::new("events.json"), false, false).await?;
//! # Ok(())
//! # }
//! ```

pub mod cmd;

// Re-export pipeline types for convenience
pub use pressroom_publisher::{BatchReport, RebuildStats, Scheduler, SiteRebuilder};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}
