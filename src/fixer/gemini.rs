//! Gemini fix provider
//!
//! Sends the issue, the surrounding lines and the full file to the Gemini
//! `generateContent` endpoint and expects a sectioned reply:
//! ```text
//! FIXED_CODE:
//! <complete fixed file content>
//!
//! COMMIT_MESSAGE:
//! <commit message>
//!
//! EXPLANATION:
//! <explanation>
//! ```
//!
//! Any request or parse failure degrades to the fallback proposal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::fallback::fallback_proposal;
use super::{read_context, FixContext, FixProposal, FixProvider};
use crate::config::FixerConfig;
use crate::scanner::Issue;

const SECTIONS: [&str; 3] = ["FIXED_CODE:", "COMMIT_MESSAGE:", "EXPLANATION:"];

/// Gemini-backed fix provider
pub(crate) struct GeminiFixer {
    config: FixerConfig,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiFixer {
    pub fn new(config: FixerConfig, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            config,
            api_key,
            client,
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        debug!("Requesting fix from {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API returned {status}: {body}");
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to decode Gemini response")?;

        response_text(&body).context("Gemini response contained no text")
    }
}

#[async_trait]
impl FixProvider for GeminiFixer {
    fn name(&self) -> &'static str {
        "Gemini"
    }

    async fn propose_fix(&self, issue: &Issue, workdir: &Path) -> Result<FixProposal> {
        let context = read_context(issue, workdir, self.config.context_lines).await?;
        let prompt = build_prompt(issue, &context);

        match self.generate(&prompt).await {
            Ok(text) => Ok(parse_reply(issue, context, &text)),
            Err(e) => {
                warn!("AI fix generation failed, using fallback: {:#}", e);
                Ok(fallback_proposal(issue, context.file))
            }
        }
    }
}

fn build_prompt(issue: &Issue, context: &FixContext) -> String {
    format!(
        "You are an expert code fixer. Fix the following issue:\n\
         \n\
         File: {file}\n\
         Line: {line}\n\
         Bug Type: {bug_type}\n\
         Description: {description}\n\
         \n\
         Context (surrounding code):\n\
         ```\n{surrounding}\n```\n\
         \n\
         Full file content:\n\
         ```\n{full}\n```\n\
         \n\
         Provide:\n\
         1. The exact fixed code (complete file content)\n\
         2. A concise commit message (max 50 chars)\n\
         3. Explanation of the fix\n\
         \n\
         Format your response as:\n\
         FIXED_CODE:\n<complete fixed file content>\n\
         \n\
         COMMIT_MESSAGE:\n<commit message>\n\
         \n\
         EXPLANATION:\n<explanation>\n",
        file = issue.file,
        line = issue.line,
        bug_type = issue.bug_type,
        description = issue.description,
        surrounding = context.surrounding,
        full = context.full,
    )
}

fn response_text(body: &Value) -> Option<String> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_reply(issue: &Issue, context: FixContext, text: &str) -> FixProposal {
    let fixed_code = extract_section(text, "FIXED_CODE:").filter(|code| !code.is_empty());
    let commit_message = extract_section(text, "COMMIT_MESSAGE:")
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| {
            let name = context
                .file
                .file_name()
                .map_or_else(|| issue.file.clone(), |n| n.to_string_lossy().to_string());
            format!("Fix {} in {name}", issue.bug_type)
        });
    let explanation = extract_section(text, "EXPLANATION:").unwrap_or_default();

    FixProposal {
        file: context.file,
        fixed_code,
        commit_message,
        explanation,
    }
}

/// Extracts the text after `marker` up to the next known section marker,
/// with code fences removed.
fn extract_section(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = SECTIONS
        .iter()
        .filter(|other| **other != marker)
        .filter_map(|other| rest.find(other))
        .min()
        .unwrap_or(rest.len());

    let content: Vec<&str> = rest[..end]
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    Some(content.join("\n").trim().to_string())
}
