use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use radsync::diagnostics::DEFAULT_PROBE_LIMIT;
use radsync::sync::conflict::LatestWinsResolver;
use radsync::sync::report::ItemOutcome;
use radsync::{
    CategoryFilter, Direction, DirectionFilter, RadSync, RetryPolicy, RunState, RunSummary,
    Settings, StoreStatus, SyncOptions, SyncProgress,
};

/// Exit code for configuration errors and failed runs.
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "radsync", about = "Mirror issues between Radicle and GitHub")]
struct Cli {
    /// Mapping store path (default: ~/.radsync/<owner>-<repo>.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Timeout in seconds for each Radicle or GitHub call
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// GitHub repository: owner/repo or a github.com URL
    #[arg(long)]
    github: String,
    /// Radicle repository id (rad:z...); defaults to the repository in --rad-path
    #[arg(long)]
    rid: Option<String>,
    /// Local Radicle checkout to run `rad` in
    #[arg(long)]
    rad_path: Option<PathBuf>,
    /// GitHub token (or set GITHUB_PERSONAL_ACCESS_TOKEN / GITHUB_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// GitHub API root, for GitHub Enterprise
    #[arg(long)]
    github_api: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Both,
    AToB,
    BToA,
}

impl From<DirectionArg> for DirectionFilter {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Both => DirectionFilter::Both,
            DirectionArg::AToB => DirectionFilter::AtoBOnly,
            DirectionArg::BToA => DirectionFilter::BtoAOnly,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror missing items in both directions
    Sync {
        #[command(flatten)]
        target: TargetArgs,
        /// Show what would be created without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Sync issues only
        #[arg(long, conflicts_with = "patches_only")]
        issues_only: bool,
        /// Sync patches only
        #[arg(long)]
        patches_only: bool,
        /// Directions to run (A is Radicle, B is GitHub)
        #[arg(long, value_enum, default_value = "both")]
        direction: DirectionArg,
        /// Skip drift and conflict detection for mapped items
        #[arg(long)]
        no_drift: bool,
        /// Concurrent creates per direction
        #[arg(long, default_value = "1")]
        concurrency: usize,
        /// Retries per item for transient failures
        #[arg(long, default_value = "0")]
        retries: u32,
        /// Report items edited on both sides with the most recent edit preferred
        #[arg(long)]
        latest_wins: bool,
        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that both platforms are reachable
    Check {
        #[command(flatten)]
        target: TargetArgs,
        /// Issues to list per platform
        #[arg(long, default_value_t = DEFAULT_PROBE_LIMIT)]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the mapping store
    Status {
        /// GitHub repository whose default store to read
        #[arg(long)]
        github: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a JSON tool (test_connection, sync_issues, sync_all)
    Tool {
        /// Tool name
        name: String,
        #[command(flatten)]
        target: TargetArgs,
        /// Pass dry_run to sync tools
        #[arg(long)]
        dry_run: bool,
    },
    /// List the JSON tools and their parameters
    Tools,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl SyncProgress for StderrProgress {
    fn on_state(&self, state: RunState) {
        log::debug!("State: {state:?}");
    }

    fn on_pass_start(&self, direction: Direction, category: radsync::Category, items: usize) {
        eprintln!("[{direction}] {category}: {items} source items");
    }

    fn on_item(&self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Created {
                source_id,
                target_id,
                title,
                ..
            } => eprintln!("  created {target_id} from {source_id} {title:?}"),
            ItemOutcome::WouldCreate(action) => {
                eprintln!("  would create from {} {:?}", action.source_id, action.title)
            }
            ItemOutcome::Failed(failure) => eprintln!(
                "  failed {}: {}",
                failure.item_id.as_deref().unwrap_or("-"),
                failure.message
            ),
            _ => {}
        }
    }
}

fn settings(cli: &Cli, target: &TargetArgs) -> anyhow::Result<Settings> {
    let mut settings = Settings::new(&target.github, target.rid.as_deref())?
        .with_rad_path(target.rad_path.clone())?
        .with_token(target.token.clone())
        .with_store_path(cli.store.clone())
        .with_timeout(Duration::from_secs(cli.timeout.max(1)));
    settings.github_api = target.github_api.clone();
    Ok(settings)
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.command {
        Commands::Sync {
            target,
            dry_run,
            issues_only,
            patches_only,
            direction,
            no_drift,
            concurrency,
            retries,
            latest_wins,
            json,
        } => {
            let settings = settings(&cli, target)?;
            let mut rs = RadSync::from_settings(&settings).await?;
            if *latest_wins {
                rs = rs.with_resolver(Box::new(LatestWinsResolver));
            }

            let cancel = rs.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted; finishing in-flight items and saving progress...");
                    cancel.cancel();
                }
            });

            let categories = if *issues_only {
                CategoryFilter::IssuesOnly
            } else if *patches_only {
                CategoryFilter::PatchesOnly
            } else {
                CategoryFilter::All
            };
            let options = SyncOptions {
                dry_run: *dry_run,
                directions: (*direction).into(),
                categories,
                detect_drift: !*no_drift,
                concurrency: (*concurrency).max(1),
                retry: RetryPolicy::with_retries(*retries),
            };
            if options.dry_run {
                eprintln!("Dry run: no changes will be made");
            }

            let summary = rs.sync(&options, &StderrProgress).await;
            print_summary(&summary, *json)?;
            Ok(summary.status.exit_code())
        }
        Commands::Check {
            target,
            limit,
            json,
        } => {
            let settings = settings(&cli, target)?;
            let rs = RadSync::from_settings(&settings).await?;
            let report = rs.test_connection((*limit).max(1)).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            Ok(if report.all_ok() { 0 } else { 1 })
        }
        Commands::Status { github, json } => {
            let path = match (&cli.store, github) {
                (Some(path), _) => path.clone(),
                (None, Some(github)) => Settings::new(github, None)?.store_path()?,
                (None, None) => {
                    anyhow::bail!("pass --store or --github to locate the mapping store")
                }
            };
            print_status(&path, *json)?;
            Ok(0)
        }
        Commands::Tool {
            name,
            target,
            dry_run,
        } => {
            let settings = settings(&cli, target)?;
            let rs = RadSync::from_settings(&settings).await?;
            let args = serde_json::json!({ "dry_run": dry_run });
            let args = if name == "test_connection" {
                serde_json::json!({})
            } else {
                args
            };
            let value = radsync::tools::call(&rs, name, &args).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(tool_exit_code(&value))
        }
        Commands::Tools => {
            println!(
                "{}",
                serde_json::to_string_pretty(&radsync::tools::list_tools())?
            );
            Ok(0)
        }
    }
}

/// Exit code for a tool payload: a `RunSummary` carries `status`, a
/// `ProbeReport` carries per-platform `ok` flags.
fn tool_exit_code(value: &serde_json::Value) -> i32 {
    if let Some(platforms) = value["platforms"].as_array() {
        let all_ok = platforms.iter().all(|p| p["ok"].as_bool() == Some(true));
        return if all_ok { 0 } else { 1 };
    }
    match value["status"].as_str() {
        Some("partial_failure") => 1,
        Some("failed") => EXIT_FATAL,
        _ => 0,
    }
}

fn print_status(path: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let status = StoreStatus::read(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Mapping store: {}", status.store_path.display());
    if !status.exists {
        println!("  (not created yet)");
        return Ok(());
    }
    println!("  Radicle:   {}", status.platform_a.as_deref().unwrap_or("-"));
    println!("  GitHub:    {}", status.platform_b.as_deref().unwrap_or("-"));
    println!("  Issues:    {}", status.issues);
    println!("  Patches:   {}", status.patches);
    match status.last_sync {
        Some(ts) => println!("  Last sync: {}", ts.to_rfc3339()),
        None => println!("  Last sync: never"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_exit_code_for_probe_report() {
        let down = json!({"platforms": [{"ok": false}, {"ok": false}]});
        assert_eq!(tool_exit_code(&down), 1);
        let half = json!({"platforms": [{"ok": true}, {"ok": false}]});
        assert_eq!(tool_exit_code(&half), 1);
        let up = json!({"platforms": [{"ok": true}, {"ok": true}]});
        assert_eq!(tool_exit_code(&up), 0);
    }

    #[test]
    fn test_tool_exit_code_for_run_summary() {
        assert_eq!(tool_exit_code(&json!({"status": "synced"})), 0);
        assert_eq!(tool_exit_code(&json!({"status": "partial_failure"})), 1);
        assert_eq!(tool_exit_code(&json!({"status": "failed"})), EXIT_FATAL);
    }
}
