//! PR comment formatting and publication.

use super::{GitHubClient, GitHubResult};
use apc_core::{Finding, Severity};
use serde_json::json;
use std::cmp::Reverse;

/// Marker prefix identifying comments posted by this service.
pub const REPORT_TAG: &str = "<!-- audit-pit-crew-report-v1 -->";

/// Publishes scan results as comments on one pull request.
pub struct PrReporter<'a> {
    client: &'a GitHubClient,
    owner: &'a str,
    repo: &'a str,
    pr_number: u64,
}

impl<'a> PrReporter<'a> {
    pub fn new(client: &'a GitHubClient, owner: &'a str, repo: &'a str, pr_number: u64) -> Self {
        Self {
            client,
            owner,
            repo,
            pr_number,
        }
    }

    /// Post the findings summary. An empty list posts the affirmative
    /// clean-scan message so reviewers see the scan ran.
    pub async fn post_report(&self, findings: &[Finding]) -> GitHubResult<()> {
        self.post_comment(&format_report(findings)).await
    }

    /// Post a scan-failure notice with the operator-visible reason.
    pub async fn post_error_report(&self, message: &str) -> GitHubResult<()> {
        let body = format!(
            "{REPORT_TAG}\n\n## Audit Pit-Crew Scan Failed\n\n\
             The security scan could not be completed:\n\n```\n{message}\n```\n\n\
             Push a new commit to retry, or contact the operators if this persists."
        );
        self.post_comment(&body).await
    }

    async fn post_comment(&self, body: &str) -> GitHubResult<()> {
        self.client
            .post(
                &format!(
                    "/repos/{}/{}/issues/{}/comments",
                    self.owner, self.repo, self.pr_number
                ),
                &json!({ "body": body }),
            )
            .await?;
        tracing::info!(
            "posted report comment on {}/{}#{}",
            self.owner,
            self.repo,
            self.pr_number
        );
        Ok(())
    }
}

/// Render findings as a Markdown report.
///
/// Findings are grouped by severity descending, then file ascending, then
/// line ascending, so the rendering is deterministic for a given set.
pub fn format_report(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return format!(
            "{REPORT_TAG}\n\n## 🛡️ Audit Pit-Crew Report\n\n\
             ✅ **Scan complete:** no new security issues found."
        );
    }

    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by(|a, b| {
        Reverse(a.severity)
            .cmp(&Reverse(b.severity))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });

    let mut report = format!(
        "{REPORT_TAG}\n\n## 🚨 Audit Pit-Crew Security Report ({} New Finding{})",
        sorted.len(),
        if sorted.len() == 1 { "" } else { "s" },
    );

    for finding in sorted {
        let emoji = match finding.severity {
            Severity::Critical | Severity::High => "🔴",
            Severity::Medium => "🟠",
            _ => "🟡",
        };
        let description = finding.description.trim();
        let first_line = description.lines().next().unwrap_or("");
        report.push_str(&format!(
            "\n---\n### {emoji} {}: {}\n\
             **Tool:** {} | **Confidence:** {}\n\
             **File:** `{}:{}`\n\n\
             > {first_line}\n\
             <details>\n<summary>Full description</summary>\n\n\
             ```text\n{description}\n```\n</details>\n",
            finding.severity,
            finding.title,
            finding.tool,
            finding.confidence,
            finding.file,
            finding.line,
        ));
    }

    report
}
