use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use deepfreeze_core::{
    CoreError, DateRange, DeepfreezeConfig, Repository, RepositoryState, RequestId, RetrievalTier,
};
use deepfreeze_storage::lifecycle::ThawParams;
use tracing_subscriber::{fmt, EnvFilter};

mod context;
mod output;

use context::Lifecycle;

#[derive(Parser, Debug)]
#[command(name = "deepfreeze")]
#[command(about = "Thaw and refreeze archived snapshot repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(long, global = true, env = "DEEPFREEZE_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore repositories from the archival tier
    Thaw {
        /// Repositories to thaw (omit to select by --start/--end)
        repos: Vec<String>,

        /// Start of the index range to mount (RFC 3339)
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// End of the index range to mount (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,

        /// Days restored objects stay readable
        #[arg(long)]
        days: Option<u32>,

        /// Retrieval tier: standard, expedited or bulk
        #[arg(long)]
        tier: Option<RetrievalTier>,

        /// Wait for the restores to finish
        #[arg(long)]
        sync: bool,

        /// Give up waiting after this many seconds (with --sync)
        #[arg(long, requires = "sync")]
        deadline_secs: Option<u64>,
    },

    /// Check a thaw request and mount what has been restored
    CheckStatus {
        request_id: RequestId,
    },

    /// List thaw requests
    List {
        /// Include completed and refrozen requests
        #[arg(long)]
        all: bool,
    },

    /// Return a thaw request's repositories to the archival tier
    Refreeze {
        request_id: RequestId,
    },

    /// Expire lapsed repositories and refreeze expired ones
    Cleanup,

    /// Unmount an active repository and mark it frozen
    Freeze {
        repo: String,
    },

    /// Record an existing snapshot repository
    Register {
        name: String,

        #[arg(long)]
        bucket: String,

        #[arg(long)]
        base_path: String,

        /// Register as already frozen
        #[arg(long)]
        frozen: bool,

        /// Earliest index timestamp held by the repository (RFC 3339)
        #[arg(long, requires = "covers_end")]
        covers_start: Option<DateTime<Utc>>,

        /// Latest index timestamp held by the repository (RFC 3339)
        #[arg(long, requires = "covers_start")]
        covers_end: Option<DateTime<Utc>>,
    },

    /// Show repositories and their lifecycle state
    Repositories,

    /// Show naming and storage settings
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DeepfreezeConfig::from_file(path)?,
        None => DeepfreezeConfig::load()?,
    };
    let lifecycle = Lifecycle::connect(config).await?;

    run(&lifecycle, cli.command, cli.json).await
}

async fn run(lc: &Lifecycle, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Thaw {
            repos,
            start,
            end,
            days,
            tier,
            sync,
            deadline_secs,
        } => {
            let range = match (start, end) {
                (Some(start), Some(end)) => Some(DateRange::new(start, end)?),
                _ => None,
            };

            let mut params = match (repos.is_empty(), range) {
                (false, Some(range)) => ThawParams::repositories(repos).with_date_range(range),
                (false, None) => ThawParams::repositories(repos),
                (true, Some(range)) => ThawParams::covering(range),
                (true, None) => bail!("name at least one repository or pass --start/--end"),
            };
            if let Some(days) = days {
                params = params.with_duration_days(days);
            }
            if let Some(tier) = tier {
                params = params.with_tier(tier);
            }
            if sync {
                let deadline = deadline_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| lc.config.thaw.sync_deadline());
                params = params.synchronous(deadline);
            }

            let outcome = lc.thaw.create_thaw_request(params).await?;
            output::thaw_outcome(&outcome, json)
        }

        Commands::CheckStatus { request_id } => {
            let progress = lc.thaw.check_status(request_id).await?;
            output::thaw_progress(&progress, json)
        }

        Commands::List { all } => {
            let requests = lc.thaw.list_requests(all).await?;
            output::thaw_requests(&requests, json)
        }

        Commands::Refreeze { request_id } => match lc.refreeze.refreeze(request_id).await {
            Ok(report) => output::refreeze_report(&report, json),
            Err(CoreError::PartialRefreezeFailure {
                request_id,
                refrozen,
                failed,
            }) => {
                output::partial_refreeze(&request_id, &refrozen, &failed, json)?;
                std::process::exit(1);
            }
            Err(e) => Err(e.into()),
        },

        Commands::Cleanup => {
            let report = lc.expiration.cleanup(Utc::now()).await?;
            output::cleanup_report(&report, json)
        }

        Commands::Freeze { repo } => {
            let repo = lc.machine.freeze(&repo).await?;
            output::repositories(std::slice::from_ref(&repo), json)
        }

        Commands::Register {
            name,
            bucket,
            base_path,
            frozen,
            covers_start,
            covers_end,
        } => {
            let mut repo = Repository::new(name, bucket, base_path);
            if frozen {
                repo = repo.with_state(RepositoryState::Frozen);
            }
            if let (Some(start), Some(end)) = (covers_start, covers_end) {
                repo = repo.with_coverage(start, end);
            }
            let repo = lc.machine.register(repo).await?;
            output::repositories(std::slice::from_ref(&repo), json)
        }

        Commands::Repositories => {
            let repos = lc.store.list_repositories().await?;
            output::repositories(&repos, json)
        }

        Commands::Settings => {
            let settings = lc.store.get_settings().await?;
            output::settings(&settings, json)
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_thaw_by_range() {
        let cli = Cli::try_parse_from([
            "deepfreeze",
            "thaw",
            "--start",
            "2024-01-01T00:00:00Z",
            "--end",
            "2024-01-31T00:00:00Z",
            "--tier",
            "bulk",
            "--sync",
        ])
        .unwrap();

        match cli.command {
            Commands::Thaw {
                repos,
                start,
                tier,
                sync,
                ..
            } => {
                assert!(repos.is_empty());
                assert!(start.is_some());
                assert_eq!(tier, Some(RetrievalTier::Bulk));
                assert!(sync);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_start_requires_end() {
        let result = Cli::try_parse_from(["deepfreeze", "thaw", "--start", "2024-01-01T00:00:00Z"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_status_rejects_bad_id() {
        assert!(Cli::try_parse_from(["deepfreeze", "check-status", "not-a-uuid"]).is_err());
    }
}
