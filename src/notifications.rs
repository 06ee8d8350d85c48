//! Notifications for finalized runs.
//!
//! Supports webhook POSTs for run completion and run error events.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::registry::{FinalStatus, RunStatusView};

/// Notification event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotificationEvent {
    /// Run finished its loop, `PASSED` or `FAILED`.
    Complete,
    /// Run ended `ERROR`.
    Error,
}

impl NotificationEvent {
    pub fn for_status(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Passed | FinalStatus::Failed => Self::Complete,
            FinalStatus::Error => Self::Error,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// Sends notifications based on configuration.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    config: NotificationConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Send notification for an event.
    ///
    /// Fire-and-forget: errors are logged and never affect the run.
    pub async fn notify(&self, event: NotificationEvent, details: &NotificationDetails) {
        let target = match event {
            NotificationEvent::Complete => self.config.on_complete.as_deref(),
            NotificationEvent::Error => self.config.on_error.as_deref(),
        };
        let Some(url) = target.and_then(webhook_url) else {
            return;
        };
        if let Err(e) = self.send_webhook(url, event, details).await {
            warn!("Failed to send {} webhook: {}", event.as_str(), e);
        }
    }

    /// Send webhook POST request with exponential backoff retry.
    ///
    /// Retries up to 3 times with delays of 2s, 4s on transient failures.
    #[allow(tail_expr_drop_order)]
    async fn send_webhook(
        &self,
        url: &str,
        event: NotificationEvent,
        details: &NotificationDetails,
    ) -> Result<()> {
        let payload = json!({
            "event": event.as_str(),
            "run_id": details.run_id,
            "final_status": details.final_status,
            "message": details.message,
            "timestamp": details.timestamp,
            "context": details.context,
        });

        debug!("Sending webhook to {}: {:?}", url, payload);

        let max_attempts = 3;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay_secs = 1u64 << attempt;
                debug!(
                    "Webhook retry attempt {} after {}s delay",
                    attempt + 1,
                    delay_secs
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            }

            match self.client.post(url).json(&payload).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        debug!("Webhook sent successfully");
                        return Ok(());
                    }

                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    // Retry on 5xx server errors and 429 rate limit
                    if status.is_server_error() || status.as_u16() == 429 {
                        last_error = Some(format!("Webhook returned {status}: {body}"));
                        continue;
                    }

                    anyhow::bail!("Webhook returned error status {status}: {body}");
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        anyhow::bail!(
            "Webhook failed after {max_attempts} attempts: {}",
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

/// Parses a notification target.
///
/// Supports `"webhook:<url>"`, a bare `http(s)://` URL and `"none"`.
fn webhook_url(value: &str) -> Option<&str> {
    if let Some(url) = value.strip_prefix("webhook:") {
        return (!url.is_empty()).then_some(url);
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value);
    }
    None
}

/// Details for a notification event.
#[derive(Debug, Clone)]
pub(crate) struct NotificationDetails {
    pub run_id: String,
    pub final_status: Option<FinalStatus>,
    pub message: String,
    pub timestamp: String,
    pub context: Option<serde_json::Value>,
}

impl NotificationDetails {
    /// Details for a finalized run, taken from its status projection.
    pub fn finalized(view: &RunStatusView, error: Option<&str>) -> Self {
        let status = view
            .final_status
            .map_or_else(|| "UNKNOWN".to_string(), |s| s.to_string());
        let message = match error {
            Some(error) => format!("Run {} ended {status}: {error}", view.run_id),
            None => format!("Run {} ended {status}", view.run_id),
        };
        Self {
            run_id: view.run_id.to_string(),
            final_status: view.final_status,
            message,
            timestamp: Utc::now().to_rfc3339(),
            context: Some(json!({
                "repo_url": view.repo_url,
                "branch_name": view.branch_name,
                "iterations_used": view.iterations_used,
                "stats": view.stats,
                "pr_url": view.pr_url,
                "manual_push_required": view.manual_push_required,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RunId, RunStats, RunStatus, Stage};

    fn view(final_status: FinalStatus) -> RunStatusView {
        RunStatusView {
            run_id: RunId::new(),
            status: RunStatus::Completed,
            stage: Stage::Completed,
            progress: 100,
            stats: RunStats::default(),
            repo_url: "https://github.com/acme/widgets".to_string(),
            team_name: "Acme".to_string(),
            team_leader: "Jo".to_string(),
            branch_name: "ACME_JO_AI_Fix".to_string(),
            final_status: Some(final_status),
            iterations_used: Some(2),
            pr_url: None,
            manual_push_required: false,
        }
    }

    #[test]
    fn test_event_for_status() {
        assert_eq!(
            NotificationEvent::for_status(FinalStatus::Passed),
            NotificationEvent::Complete
        );
        assert_eq!(
            NotificationEvent::for_status(FinalStatus::Failed),
            NotificationEvent::Complete
        );
        assert_eq!(
            NotificationEvent::for_status(FinalStatus::Error),
            NotificationEvent::Error
        );
    }

    #[test]
    fn test_webhook_url_parsing() {
        assert_eq!(
            webhook_url("webhook:https://example.com/hook"),
            Some("https://example.com/hook")
        );
        assert_eq!(
            webhook_url("https://example.com/hook"),
            Some("https://example.com/hook")
        );
        assert_eq!(webhook_url("webhook:"), None);
        assert_eq!(webhook_url("none"), None);
        assert_eq!(webhook_url("desktop"), None);
    }

    #[test]
    fn test_details_for_finalized_run() {
        let view = view(FinalStatus::Passed);
        let details = NotificationDetails::finalized(&view, None);
        assert_eq!(details.run_id, view.run_id.to_string());
        assert!(details.message.ends_with("ended PASSED"));
        let context = details.context.unwrap();
        assert_eq!(context["iterations_used"], 2);
        assert_eq!(context["branch_name"], "ACME_JO_AI_Fix");
    }

    #[test]
    fn test_details_include_error() {
        let details = NotificationDetails::finalized(&view(FinalStatus::Error), Some("cancelled"));
        assert!(details.message.ends_with("ended ERROR: cancelled"));
    }

    #[tokio::test]
    async fn test_notify_without_target_is_noop() {
        let notifier = Notifier::new(NotificationConfig::default());
        let details = NotificationDetails::finalized(&view(FinalStatus::Failed), None);
        notifier.notify(NotificationEvent::Complete, &details).await;
    }

    #[tokio::test]
    async fn test_notify_disabled_target() {
        let notifier = Notifier::new(NotificationConfig {
            on_complete: Some("none".to_string()),
            on_error: Some("webhook:".to_string()),
        });
        let details = NotificationDetails::finalized(&view(FinalStatus::Error), Some("boom"));
        notifier.notify(NotificationEvent::Complete, &details).await;
        notifier.notify(NotificationEvent::Error, &details).await;
    }
}
