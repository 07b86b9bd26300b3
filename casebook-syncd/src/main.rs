use anyhow::Context;
use clap::{Parser, Subcommand};
use casebook_syncd::daemon::{DaemonConfig, DaemonRuntime, log_sync_failure};
use casebook_syncd::mirror::Collection;
use casebook_syncd::sync::engine::{SyncStats, TaskOutcome, TaskReport};
use casebook_syncd::sync::progress::{ProgressStatus, SyncProgress};

#[derive(Parser)]
#[command(
    name = "casebook-syncd",
    about = "Mirror the Casebook backend into a local database"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run one full sync, or a single task
    Sync {
        /// Task name, e.g. "Projects" or "Project Users"
        #[arg(long)]
        only: Option<String>,
    },
    /// Sync on an interval until interrupted
    Watch,
    /// Show record counts and the last completed sync
    Stats,
    /// Count the records of one collection, e.g. "formTemplates"
    Count { collection: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = DaemonConfig::from_env()?;
    let runtime = DaemonRuntime::bootstrap(config).await?;
    let engine = runtime.engine();

    match args.command {
        Command::Sync { only: Some(name) } => match engine.sync_one(&name).await {
            Ok(Some(report)) => println!("{}", describe_task(&report)),
            Ok(None) => println!("a sync is already running"),
            Err(err) => {
                log_sync_failure(&err);
                return Err(err).context("sync failed");
            }
        },
        Command::Sync { only: None } => {
            let reporter = |progress: &SyncProgress| println!("{}", describe_progress(progress));
            match engine.sync_all(Some(&reporter)).await {
                Ok(Some(report)) => {
                    for task in &report.tasks {
                        println!("  {}", describe_task(task));
                    }
                    println!("{} records written", report.records_written());
                }
                Ok(None) => println!("a sync is already running"),
                Err(err) => {
                    log_sync_failure(&err);
                    return Err(err).context("sync failed");
                }
            }
        }
        Command::Watch => runtime.watch().await?,
        Command::Stats => print_stats(&engine.sync_stats().await?),
        Command::Count { collection } => {
            let collection = Collection::parse(&collection)?;
            println!("{collection}: {}", engine.store().count(collection).await?);
        }
    }
    Ok(())
}

fn describe_progress(progress: &SyncProgress) -> String {
    match progress.status {
        ProgressStatus::Syncing => format!(
            "[{}/{}] {}",
            progress.completed + 1,
            progress.total,
            progress.current_entity
        ),
        ProgressStatus::Completed => format!("[{0}/{0}] done", progress.total),
        ProgressStatus::Error => format!("[{}/{}] failed", progress.completed, progress.total),
    }
}

fn describe_task(report: &TaskReport) -> String {
    match report.outcome {
        TaskOutcome::Completed { records } => format!("{}: {records} records", report.name),
        TaskOutcome::Skipped { reason } => format!("{}: skipped ({reason})", report.name),
    }
}

fn print_stats(stats: &SyncStats) {
    println!("projects:       {}", stats.projects);
    println!("subprojects:    {}", stats.subprojects);
    println!("activities:     {}", stats.activities);
    println!("users:          {}", stats.users);
    println!("beneficiaries:  {}", stats.beneficiaries);
    println!("form templates: {}", stats.form_templates);
    println!("services:       {}", stats.services);
    println!("kpis:           {}", stats.kpis);
    match &stats.last_sync {
        Some(meta) => println!("last sync:      {} ({:?})", meta.last_synced_at, meta.status),
        None => println!("last sync:      never"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_with_single_task() {
        let args =
            Args::try_parse_from(["casebook-syncd", "sync", "--only", "Project Users"]).unwrap();
        assert_eq!(
            args.command,
            Command::Sync {
                only: Some("Project Users".into())
            }
        );
    }

    #[test]
    fn parses_plain_commands() {
        let args = Args::try_parse_from(["casebook-syncd", "watch"]).unwrap();
        assert_eq!(args.command, Command::Watch);
        let args = Args::try_parse_from(["casebook-syncd", "count", "kpis"]).unwrap();
        assert_eq!(
            args.command,
            Command::Count {
                collection: "kpis".into()
            }
        );
        assert!(Args::try_parse_from(["casebook-syncd"]).is_err());
    }

    #[test]
    fn progress_lines_are_one_based() {
        let line = describe_progress(&SyncProgress {
            total: 20,
            completed: 0,
            current_entity: "Projects".into(),
            status: ProgressStatus::Syncing,
        });
        assert_eq!(line, "[1/20] Projects");
    }

    #[test]
    fn skipped_tasks_show_reason() {
        let line = describe_task(&TaskReport {
            name: "Service Deliveries",
            outcome: TaskOutcome::Skipped {
                reason: "no bulk service-delivery endpoint",
            },
        });
        assert_eq!(
            line,
            "Service Deliveries: skipped (no bulk service-delivery endpoint)"
        );
    }
}
