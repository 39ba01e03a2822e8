//! Rebuild command - regenerates a whole site

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use pressroom_publisher::{SiteRebuilder, store::fs::ProjectLayout};

/// Run the rebuild command.
pub async fn run(project: &Path, site: &str) -> Result<()> {
    tracing::info!(?project, site, "Starting rebuild");

    let rebuilder = SiteRebuilder::new(ProjectLayout::new(project).stores());
    let stats = rebuilder
        .rebuild(site)
        .await
        .wrap_err_with(|| format!("Rebuild of site \"{site}\" failed"))?;

    println!();
    println!("  Rebuild completed successfully!");
    println!();
    println!("  Pages:      {}", stats.pages);
    println!("  Outputs:    {}", stats.outputs);
    println!("  Metadata:   {} records, {} operations", stats.metadata_records, stats.metadata_operations);
    println!();
    println!("  Duration:   {:.2}s", stats.duration_ms as f64 / 1000.0);
    println!();

    tracing::info!(?stats, "Rebuild completed successfully");
    Ok(())
}
