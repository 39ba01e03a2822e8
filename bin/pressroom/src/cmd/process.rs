//! Process command - runs one batch of content-change events

use std::{
    path::Path,
    time::{Duration, Instant},
};

use color_eyre::eyre::{Result, WrapErr, bail};
use pressroom_core::EventRecord;
use pressroom_publisher::{BatchReport, Scheduler, store::fs::ProjectLayout};

/// Run the process command.
///
/// Applies the events to each site's reference graph and publishes what they
/// affect. Failures are listed in the report; with `strict` they also fail
/// the command.
pub async fn run(project: &Path, events: &Path, json: bool, strict: bool) -> Result<()> {
    let start = Instant::now();
    tracing::info!(?project, ?events, "Processing event batch");

    let records = read_events(events)?;
    let scheduler = Scheduler::new(ProjectLayout::new(project).stores());
    let report = scheduler.process(&records).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).wrap_err("Failed to serialize report")?
        );
    } else {
        print_report(&report, start.elapsed());
    }

    let failures = report.failures().count();
    if strict && failures > 0 {
        bail!("{failures} site or task failures");
    }
    Ok(())
}

/// Read a JSON array of event records.
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read events from {}", path.display()))?;
    serde_json::from_str(&content).wrap_err("Failed to parse event records")
}

fn print_report(report: &BatchReport, duration: Duration) {
    println!();
    for site in &report.sites {
        println!("  Site:       {}", site.site);
        println!("  Events:     {} ({} skipped)", site.events, site.skipped_events);
        println!("  Published:  {}", site.pages_published.len());
        println!("  Removed:    {}", site.pages_removed.len());
        println!("  Assets:     {} published, {} removed", site.assets_published.len(), site.assets_removed.len());
        for failure in &site.failures {
            println!("  ✗ {}: {}", failure.task, failure.message);
        }
        println!();
    }
    println!("  Duration:   {:.2}s", duration.as_secs_f64());
    println!();
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, path: &str, content: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_process_project() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "sites/blog.toml", "site_id = \"blog\"\nmetadata_retry_backoff_ms = 0\n");
        write(root, "templates/blog/html/page.tmpl", "<h1>{{ title }}</h1>");
        let page = r#"{"sys": {"id": "p1", "type": "Entry", "contentType": {"sys": {"id": "page"}}},
                       "fields": {"slug": "home", "title": "Home"}}"#;
        write(root, "content/blog.json", &format!("{{\"items\": [{page}]}}"));
        write(
            root,
            "events.json",
            &format!("[{{\"site\": \"blog\", \"topic\": \"EntryPublish\", \"payload\": {page}}}]"),
        );

        run(root, &root.join("events.json"), false, true).await.unwrap();

        assert_eq!(
            fs::read_to_string(root.join("public/blog/home.html")).unwrap(),
            "<h1>Home</h1>"
        );
        assert!(root.join("state/blog-content-meta.json").exists());
        assert!(root.join("state/blog-site-meta.json").exists());
    }

    #[tokio::test]
    async fn test_process_strict_fails_on_missing_site() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "events.json",
            r#"[{"site": "shop", "topic": "EntryUnpublish", "payload": {"sys": {"id": "p1"}}}]"#,
        );

        assert!(run(root, &root.join("events.json"), false, false).await.is_ok());
        assert!(run(root, &root.join("events.json"), true, true).await.is_err());
    }

    #[test]
    fn test_read_events_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "events.json", "{not json");
        assert!(read_events(&dir.path().join("events.json")).is_err());
        assert!(read_events(&dir.path().join("missing.json")).is_err());
    }
}
