//! Reconcile command - brings a site's metadata index in line with a snapshot

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use pressroom_publisher::{MetadataSnapshot, Reconciler, store::fs::ProjectLayout};

/// Run the reconcile command.
pub async fn run(project: &Path, site: &str, snapshot: &Path) -> Result<()> {
    tracing::info!(?project, site, ?snapshot, "Reconciling metadata index");

    let content = std::fs::read_to_string(snapshot)
        .wrap_err_with(|| format!("Failed to read snapshot {}", snapshot.display()))?;
    let snapshot: MetadataSnapshot =
        serde_json::from_str(&content).wrap_err("Failed to parse metadata snapshot")?;

    let stores = ProjectLayout::new(project).stores();
    let config = stores
        .configs
        .load(site)
        .await
        .wrap_err("Failed to load site configuration")?;

    let reconciler = Reconciler::for_site(stores.metadata.as_ref(), &config);
    let stats = reconciler
        .reconcile(&snapshot)
        .await
        .wrap_err_with(|| format!("Reconciliation of {} failed", reconciler.index()))?;

    println!();
    println!("  Index:      {}", reconciler.index());
    println!("  Records:    {}", snapshot.len());
    println!("  Operations: {}", stats.operations);
    println!("  Writes:     {} ({} retried)", stats.write_calls, stats.retried);
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn test_reconcile_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sites")).unwrap();
        fs::create_dir_all(root.join("state")).unwrap();
        fs::write(root.join("sites/blog.toml"), "site_id = \"blog\"\n").unwrap();
        fs::write(
            root.join("state/blog-site-meta.json"),
            r#"{"gone": {"pageEntryIds": ["p9"]}}"#,
        )
        .unwrap();
        fs::write(
            root.join("snapshot.json"),
            r#"{"p1": {"publishPaths": ["home.html"], "usedEntryIds": ["m1"]},
                "m1": {"pageEntryIds": ["p1"]}}"#,
        )
        .unwrap();

        run(root, "blog", &root.join("snapshot.json")).await.unwrap();

        let index: MetadataSnapshot =
            serde_json::from_str(&fs::read_to_string(root.join("state/blog-site-meta.json")).unwrap())
                .unwrap();
        let expected: MetadataSnapshot =
            serde_json::from_str(&fs::read_to_string(root.join("snapshot.json")).unwrap()).unwrap();
        assert_eq!(index, expected);
    }
}
