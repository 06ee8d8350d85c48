//! Formatting functions for terminal output.
//!
//! Pure functions returning strings; printing happens in the commands.

use colored::Colorize;
use std::fmt::Write;

use crate::registry::{FinalStatus, LogEntry, LogKind, RunResult};

fn rule() -> String {
    "━".repeat(50).dimmed().to_string()
}

/// Formats a duration in seconds for display (e.g., "2h 5m 30s").
pub(crate) fn format_duration(total_secs: f64) -> String {
    // Sub-second precision is noise at this scale.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = total_secs.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn format_status(status: Option<FinalStatus>) -> String {
    match status {
        Some(FinalStatus::Passed) => "PASSED".green().bold().to_string(),
        Some(FinalStatus::Failed) => "FAILED".yellow().bold().to_string(),
        Some(FinalStatus::Error) => "ERROR".red().bold().to_string(),
        None => "RUNNING".cyan().to_string(),
    }
}

/// Startup banner for a foreground run.
pub(crate) fn format_banner(run_id: &str, repo_url: &str, branch_name: &str, retry_limit: u32) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "{}", "   Healer Run Starting".yellow().bold());
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "  Run:        {}", run_id.cyan());
    let _ = writeln!(out, "  Repo:       {}", repo_url.cyan());
    let _ = writeln!(out, "  Branch:     {}", branch_name.cyan());
    let _ = writeln!(out, "  Retries:    {}", retry_limit.to_string().cyan());
    let _ = writeln!(out, "{}", rule());
    out
}

/// One log trail line, colored by kind.
pub(crate) fn format_log_line(entry: &LogEntry) -> String {
    let time = entry.timestamp.format("%H:%M:%S").to_string().dimmed();
    let message = match entry.kind {
        LogKind::Info => entry.message.normal(),
        LogKind::Command => format!("$ {}", entry.message).cyan(),
        LogKind::Success => entry.message.green(),
        LogKind::Error => entry.message.red(),
    };
    format!("{time} {message}")
}

/// Summary of a finalized run.
pub(crate) fn format_result(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "{}", "   Run Result".yellow().bold());
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "  Run:        {}", result.run_id.to_string().cyan());
    let _ = writeln!(out, "  Repo:       {}", result.repo_url.cyan());
    let _ = writeln!(out, "  Branch:     {}", result.branch_name.cyan());
    let _ = writeln!(out, "  Status:     {}", format_status(result.final_status));

    if let Some(iterations) = result.iterations_used {
        let _ = writeln!(
            out,
            "  Iterations: {}",
            format!("{iterations}/{}", result.retry_limit).cyan()
        );
    }
    if let Some(secs) = result.total_time_secs {
        let _ = writeln!(out, "  Duration:   {}", format_duration(secs).cyan());
    }
    let _ = writeln!(
        out,
        "  Bugs:       {} found, {} fixed, {} failed",
        result.stats.total_bugs.to_string().cyan(),
        result.stats.fixed_bugs.to_string().green(),
        result.stats.failed_fixes.to_string().red()
    );
    let _ = writeln!(out, "  CI runs:    {}", result.cicd_runs.len().to_string().cyan());

    if let Some(ref url) = result.pr_url {
        let _ = writeln!(out, "  PR:         {}", url.green());
    }
    if result.manual_push_required {
        let _ = writeln!(
            out,
            "  {} Manual push required: git push origin {}",
            "!".yellow().bold(),
            result.branch_name
        );
    }
    if let Some(ref error) = result.error {
        let _ = writeln!(out, "  Error:      {}", error.red());
    }
    let _ = writeln!(out, "{}", rule());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RunId, RunStats};
    use chrono::Utc;

    fn result() -> RunResult {
        RunResult {
            run_id: RunId::new(),
            repo_url: "https://github.com/acme/widgets".to_string(),
            team_name: "Rift".to_string(),
            team_leader: "Ann".to_string(),
            branch_name: "RIFT_ANN_AI_Fix".to_string(),
            retry_limit: 5,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            total_time_secs: Some(75.0),
            iterations_used: Some(2),
            final_status: Some(FinalStatus::Passed),
            error: None,
            pr_url: None,
            manual_push_required: true,
            stats: RunStats {
                total_bugs: 3,
                fixed_bugs: 2,
                failed_fixes: 1,
            },
            fixes: Vec::new(),
            cicd_runs: Vec::new(),
            logs: Vec::new(),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5.4), "5s");
        assert_eq!(format_duration(75.0), "1m 15s");
        assert_eq!(format_duration(7530.0), "2h 5m 30s");
        assert_eq!(format_duration(-1.0), "0s");
    }

    #[test]
    fn test_format_banner() {
        let out = format_banner("abc", "https://github.com/acme/widgets", "RIFT_ANN_AI_Fix", 3);
        assert!(out.contains("Healer Run Starting"));
        assert!(out.contains("RIFT_ANN_AI_Fix"));
        assert!(out.contains('3'));
    }

    #[test]
    fn test_format_log_line_prefixes_commands() {
        let entry = LogEntry {
            id: "r_0".to_string(),
            seq: 0,
            timestamp: Utc::now(),
            message: "git push origin main".to_string(),
            kind: LogKind::Command,
        };
        assert!(format_log_line(&entry).contains("$ git push origin main"));
    }

    #[test]
    fn test_format_result() {
        let out = format_result(&result());
        assert!(out.contains("PASSED"));
        assert!(out.contains("2/5"));
        assert!(out.contains("1m 15s"));
        assert!(out.contains("Manual push required: git push origin RIFT_ANN_AI_Fix"));
        assert!(!out.contains("Error:"));
    }

    #[test]
    fn test_format_result_with_error() {
        let mut result = result();
        result.final_status = Some(FinalStatus::Error);
        result.error = Some("cancelled".to_string());
        result.iterations_used = None;
        let out = format_result(&result);
        assert!(out.contains("ERROR"));
        assert!(out.contains("cancelled"));
        assert!(!out.contains("Iterations"));
    }
}
