use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use docship::config::UploaderConfig;
use docship::sync::controller::RunController;
use docship::sync::engine::{ItemKind, ItemOutcome, ProgressEvent, RunRequest};
use docship::sync::local;
use docship::sync::progress::ProgressAggregator;
use docship_core::{HttpRepository, NodeId, Repository};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Run(RunArgs),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunArgs {
    path: PathBuf,
    parent: Option<i64>,
    flat: bool,
}

fn parse_cli<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let mut path: Option<PathBuf> = None;
    let mut parent: Option<i64> = None;
    let mut flat = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help),
            "--flat" => flat = true,
            "--parent" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--parent requires a node id"))?;
                parent = Some(
                    value
                        .parse::<i64>()
                        .with_context(|| format!("invalid parent node id: {value}"))?,
                );
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            other => {
                if path.is_some() {
                    anyhow::bail!("only one path may be given");
                }
                path = Some(PathBuf::from(other));
            }
        }
    }
    let path = path.ok_or_else(|| anyhow::anyhow!("no path given; see --help"))?;
    Ok(CliCommand::Run(RunArgs { path, parent, flat }))
}

fn print_usage() {
    println!("Usage: docship [options] <path>");
    println!("  <path>          Local file or directory to upload");
    println!("  --parent <id>   Remote parent node id (default: DOCSHIP_PARENT_ID)");
    println!("  --flat          Upload a directory's entries without creating");
    println!("                  a folder for the directory itself");
    println!("  --help, -h      Show this help");
}

fn describe(kind: ItemKind, outcome: ItemOutcome, name: &str) -> String {
    match (kind, outcome) {
        (ItemKind::Folder, ItemOutcome::AlreadyExists) => format!("folder {name} already exists"),
        (ItemKind::Folder, _) => format!("folder {name} added"),
        (ItemKind::File, ItemOutcome::VersionAdded) => format!("new version of {name} added"),
        (ItemKind::File, _) => format!("document {name} added"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = match parse_cli(std::env::args())? {
        CliCommand::Help => {
            print_usage();
            return Ok(());
        }
        CliCommand::Run(args) => args,
    };

    let config = UploaderConfig::from_env()?;
    let repository: Arc<dyn Repository> = Arc::new(HttpRepository::new(
        &config.base_url,
        &config.username,
        &config.password,
    )?);

    let metadata = tokio::fs::metadata(&args.path)
        .await
        .with_context(|| format!("cannot access {}", args.path.display()))?;
    let include_root_folder = metadata.is_dir() && !args.flat;
    let remote_parent = NodeId(args.parent.unwrap_or(config.parent_id.0));

    let total = if metadata.is_dir() {
        local::count_entries(&args.path).await? + u64::from(include_root_folder)
    } else {
        1
    };
    let mut progress = ProgressAggregator::new(total);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut controller = RunController::new(repository, events_tx);
    controller.start(RunRequest {
        root: args.path.clone(),
        remote_parent,
        include_root_folder,
    })?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_notified = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !cancel_notified => {
                cancel_notified = true;
                if controller.cancel().is_ok() {
                    eprintln!("[docship] cancellation requested; the current upload finishes first");
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                progress.apply(&event);
                match event {
                    ProgressEvent::TokenAcquired { .. } => {
                        eprintln!("[docship] session token acquired");
                    }
                    ProgressEvent::EnteringItem { .. } | ProgressEvent::ByteProgress { .. } => {}
                    ProgressEvent::ItemResult { kind, remote_id, name, outcome } => {
                        let percent = (progress.overall_fraction() * 100.0) as u64;
                        println!(
                            "({percent}%) {{{remote_id}}} - {}.",
                            describe(kind, outcome, &name)
                        );
                    }
                    ProgressEvent::Error { name, message } => {
                        eprintln!("[docship] {name}: {message}");
                    }
                    ProgressEvent::Completed { summary } => {
                        if summary.cancelled {
                            eprintln!("[docship] run cancelled after {} of {} items", summary.processed, summary.total);
                        }
                        println!("{summary}");
                        break;
                    }
                }
            }
        }
    }

    controller.wait().await;
    Ok(())
}
