//! Pressroom CLI
//!
//! Incremental publisher for CMS-driven static sites.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

/// Command-line interface for Pressroom.
#[derive(Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Incremental publisher for CMS-driven static sites"
)]
struct Cli {
    /// Project directory (sites/, templates/, content/, media/, public/, state/)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Process a batch of content-change events
    Process {
        /// JSON file holding an array of event records
        events: PathBuf,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
        /// Exit with an error when any site or task failed
        #[arg(long)]
        strict: bool,
    },
    /// Regenerate every page of a site and reconcile its metadata index
    Rebuild {
        /// Site identifier
        site: String,
    },
    /// Reconcile a metadata snapshot into a site's index
    Reconcile {
        /// Site identifier
        site: String,
        /// JSON file holding the new snapshot
        snapshot: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    pressroom::init_tracing(cli.verbose);

    match cli.command {
        Commands::Process {
            events,
            json,
            strict,
        } => {
            pressroom::cmd::process::run(&cli.project, &events, json, strict).await?;
        }
        Commands::Rebuild { site } => {
            pressroom::cmd::rebuild::run(&cli.project, &site).await?;
        }
        Commands::Reconcile { site, snapshot } => {
            pressroom::cmd::reconcile::run(&cli.project, &site, &snapshot).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_cli_process_command_parsing() {
        let args = ["pressroom", "process", "events.json"];
        let cli = Cli::parse_from(args);

        assert_eq!(cli.project, PathBuf::from("."));
        assert_eq!(cli.verbose, 0);

        match cli.command {
            Commands::Process {
                events,
                json,
                strict,
            } => {
                assert_eq!(events, PathBuf::from("events.json"));
                assert!(!json);
                assert!(!strict);
            }
            _ => panic!("Expected Process command"),
        }
    }

    #[test]
    fn test_cli_process_flags() {
        let args = ["pressroom", "process", "batch.json", "--json", "--strict"];
        let cli = Cli::parse_from(args);

        match cli.command {
            Commands::Process { json, strict, .. } => {
                assert!(json);
                assert!(strict);
            }
            _ => panic!("Expected Process command"),
        }
    }

    #[test]
    fn test_cli_rebuild_command_parsing() {
        let args = ["pressroom", "--project", "/srv/site", "rebuild", "blog"];
        let cli = Cli::parse_from(args);

        assert_eq!(cli.project, PathBuf::from("/srv/site"));
        match cli.command {
            Commands::Rebuild { site } => assert_eq!(site, "blog"),
            _ => panic!("Expected Rebuild command"),
        }
    }

    #[test]
    fn test_cli_reconcile_command_parsing() {
        let args = ["pressroom", "reconcile", "blog", "snapshot.json"];
        let cli = Cli::parse_from(args);

        match cli.command {
            Commands::Reconcile { site, snapshot } => {
                assert_eq!(site, "blog");
                assert_eq!(snapshot, PathBuf::from("snapshot.json"));
            }
            _ => panic!("Expected Reconcile command"),
        }
    }

    #[test]
    fn test_cli_verbosity_flags() {
        let args = ["pressroom", "-vvv", "rebuild", "blog"];
        let cli = Cli::parse_from(args);
        assert_eq!(cli.verbose, 3);
    }
}
