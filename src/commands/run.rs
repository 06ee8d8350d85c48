//! Foreground run: start one run and stream its log trail until it ends.

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::format::{format_banner, format_log_line, format_result};
use crate::config::Config;
use crate::registry::{FinalStatus, RunEvent, RunId};
use crate::supervisor::{RunRequest, Supervisor};

fn print_event(run_id: RunId, event: &RunEvent) {
    if let RunEvent::LogAppended { run_id: id, entry } = event {
        if *id == run_id {
            println!("{}", format_log_line(entry));
        }
    }
}

/// Runs to completion, returning the final status.
pub async fn run(config: &Config, request: RunRequest) -> Result<FinalStatus> {
    let supervisor = Supervisor::from_config(config);
    // Subscribe before starting so no log line is missed.
    let mut events = supervisor.registry().subscribe();

    let repo_url = request.repo_url.clone();
    let handle = supervisor.start(request)?;
    let run_id = handle.run_id;
    let retry_limit = supervisor
        .registry()
        .get_full_result(run_id)
        .map_or(config.runs.default_retry_limit, |r| r.retry_limit);
    print!(
        "{}",
        format_banner(&run_id.to_string(), &repo_url, &handle.branch_name, retry_limit)
    );

    let mut completion = handle.completion;
    let final_status = loop {
        tokio::select! {
            result = &mut completion => {
                break result.context("Run task failed")?;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(run_id, &event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "log stream lagged"),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{} Cancelling run...", "!".yellow().bold());
                supervisor.cancel(run_id)?;
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print_event(run_id, &event);
    }

    let result = supervisor.result(run_id).await?;
    print!("{}", format_result(&result));

    let snapshot = supervisor.registry().store().path_for(run_id);
    if snapshot.exists() {
        println!("  Results:    {}", snapshot.display().to_string().dimmed());
    }

    Ok(final_status)
}
