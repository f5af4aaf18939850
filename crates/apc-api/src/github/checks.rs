//! Check-run lifecycle: the merge gate attached to the PR's head commit.
//!
//! A check run is created `in_progress` when a differential scan starts and
//! completed with `success` or `failure` when it ends. Branch protection on
//! the check name turns the failure conclusion into a blocked merge.

use super::{GitHubClient, GitHubResult};
use apc_core::{Finding, Severity};
use serde::Serialize;
use serde_json::json;

pub const CHECK_NAME: &str = "Audit Pit-Crew Security Scan";

/// Annotation cap per check-run update, enforced by the GitHub API.
const MAX_ANNOTATIONS: usize = 50;
/// Findings listed in the detailed text before truncation.
const MAX_DETAILED_FINDINGS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
}

impl CheckConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Failure => "failure",
        }
    }
}

/// Inline annotation shown on the PR diff.
#[derive(Debug, Serialize, PartialEq)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub annotation_level: &'static str,
    pub title: String,
    pub message: String,
}

/// Output block of a completed check run.
#[derive(Debug)]
pub struct CheckOutput {
    pub title: String,
    pub summary: String,
    pub text: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl CheckOutput {
    /// Output for a scan skipped because the diff touched no Solidity.
    pub fn no_changes() -> Self {
        CheckOutput {
            title: "No Solidity changes".to_string(),
            summary: "no Solidity changes".to_string(),
            text: None,
            annotations: Vec::new(),
        }
    }

    /// Output for a scan that could not complete. The message is the
    /// operator-visible reason only; never a stack trace.
    pub fn scan_error(message: &str) -> Self {
        CheckOutput {
            title: "Security scan failed".to_string(),
            summary: format!(
                "The security scan could not be completed.\n\n**Error:**\n```\n{message}\n```"
            ),
            text: Some(
                "This may be due to compilation errors in the Solidity sources. \
                 Check the service logs for details."
                    .to_string(),
            ),
            annotations: Vec::new(),
        }
    }
}

/// Decide the conclusion and build the check output for a finished scan.
///
/// The conclusion is `failure` iff any finding is at or above
/// `block_on_severity`; otherwise `success`, even when non-blocking findings
/// exist.
pub fn evaluate(findings: &[Finding], block_on: Severity) -> (CheckConclusion, CheckOutput) {
    let blocking: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity.at_least(block_on))
        .collect();

    let (conclusion, title) = if !blocking.is_empty() {
        (
            CheckConclusion::Failure,
            format!("{} blocking issue(s) found", blocking.len()),
        )
    } else if !findings.is_empty() {
        (
            CheckConclusion::Success,
            format!("{} issue(s) found (none blocking)", findings.len()),
        )
    } else {
        (
            CheckConclusion::Success,
            "No new security issues found".to_string(),
        )
    };

    let mut summary = String::new();
    if findings.is_empty() {
        summary.push_str("No new security vulnerabilities were introduced in this PR.\n");
    } else {
        summary.push_str("### Issue Summary\n\n| Severity | Count |\n|----------|-------|\n");
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Informational,
        ] {
            let count = findings.iter().filter(|f| f.severity == severity).count();
            if count > 0 {
                summary.push_str(&format!("| {severity} | {count} |\n"));
            }
        }
        summary.push_str(&format!("\n**Blocking threshold:** `{block_on}` or higher\n"));
        if blocking.is_empty() {
            summary.push_str("\nNo issues meet the blocking threshold.\n");
        } else {
            summary.push_str(&format!(
                "\nFound **{}** issue(s) that block this PR.\n",
                blocking.len()
            ));
        }
    }

    let text = (!findings.is_empty()).then(|| {
        let mut text = String::from("## Detailed Findings\n");
        for (index, finding) in findings.iter().take(MAX_DETAILED_FINDINGS).enumerate() {
            text.push_str(&format!(
                "\n### {}. [{}] {}\n**File:** `{}:{}`\n**Tool:** {}\n\n> {}\n",
                index + 1,
                finding.severity,
                finding.kind,
                finding.file,
                finding.line,
                finding.tool,
                truncate(&finding.description, 500),
            ));
        }
        if findings.len() > MAX_DETAILED_FINDINGS {
            text.push_str(&format!(
                "\n_...and {} more issue(s). See the PR comment for full details._\n",
                findings.len() - MAX_DETAILED_FINDINGS
            ));
        }
        text
    });

    let output = CheckOutput {
        title,
        summary,
        text,
        annotations: build_annotations(findings),
    };
    (conclusion, output)
}

/// Inline annotations for findings with a usable location.
fn build_annotations(findings: &[Finding]) -> Vec<Annotation> {
    findings
        .iter()
        .filter(|f| !f.file.is_empty() && f.line > 0)
        .take(MAX_ANNOTATIONS)
        .map(|f| Annotation {
            path: f.file.clone(),
            start_line: f.line,
            end_line: f.line,
            annotation_level: if f.severity.at_least(Severity::High) {
                "failure"
            } else {
                "warning"
            },
            title: format!("[{}] {}", f.tool, f.kind),
            message: truncate(&f.description, 65_535).to_string(),
        })
        .collect()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Drives the check-run REST lifecycle for one repository.
pub struct ChecksManager<'a> {
    client: &'a GitHubClient,
    owner: &'a str,
    repo: &'a str,
}

impl<'a> ChecksManager<'a> {
    pub fn new(client: &'a GitHubClient, owner: &'a str, repo: &'a str) -> Self {
        Self { client, owner, repo }
    }

    /// Create an `in_progress` check run attached to `head_sha`.
    pub async fn create(&self, head_sha: &str) -> GitHubResult<u64> {
        let payload = json!({
            "name": CHECK_NAME,
            "head_sha": head_sha,
            "status": "in_progress",
            "started_at": chrono::Utc::now().to_rfc3339(),
            "output": {
                "title": "Security scan in progress...",
                "summary": "Audit Pit-Crew is analyzing this change for security issues."
            }
        });

        let response = self
            .client
            .post(&format!("/repos/{}/{}/check-runs", self.owner, self.repo), &payload)
            .await?;
        let id = response.get("id").and_then(serde_json::Value::as_u64).unwrap_or(0);
        tracing::info!(
            "created check run {id} for {}/{}@{}",
            self.owner,
            self.repo,
            &head_sha[..head_sha.len().min(7)]
        );
        Ok(id)
    }

    /// Complete a check run with its conclusion and output.
    pub async fn complete(
        &self,
        check_run_id: u64,
        conclusion: CheckConclusion,
        output: CheckOutput,
    ) -> GitHubResult<()> {
        let mut output_payload = json!({
            "title": output.title,
            "summary": output.summary,
        });
        if let Some(text) = output.text {
            output_payload["text"] = json!(text);
        }
        if !output.annotations.is_empty() {
            output_payload["annotations"] = serde_json::to_value(&output.annotations)
                .unwrap_or(serde_json::Value::Null);
        }

        let payload = json!({
            "status": "completed",
            "conclusion": conclusion.as_str(),
            "completed_at": chrono::Utc::now().to_rfc3339(),
            "output": output_payload,
        });

        self.client
            .patch(
                &format!("/repos/{}/{}/check-runs/{check_run_id}", self.owner, self.repo),
                &payload,
            )
            .await?;
        tracing::info!(
            "completed check run {check_run_id} with conclusion {}",
            conclusion.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, file: &str, line: u32) -> Finding {
        Finding {
            tool: "slither".to_string(),
            kind: "reentrancy".to_string(),
            severity,
            confidence: "High".to_string(),
            title: "reentrancy".to_string(),
            description: "description".to_string(),
            file: file.to_string(),
            line,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_evaluate_blocks_at_threshold() {
        let findings = vec![
            finding(Severity::High, "a.sol", 1),
            finding(Severity::Medium, "a.sol", 2),
        ];
        let (conclusion, output) = evaluate(&findings, Severity::High);
        assert_eq!(conclusion, CheckConclusion::Failure);
        assert!(output.title.contains("1 blocking"));
        assert!(output.summary.contains("| High | 1 |"));
        assert!(output.summary.contains("| Medium | 1 |"));
    }

    #[test]
    fn test_evaluate_success_when_nothing_blocks() {
        let findings = vec![finding(Severity::Medium, "a.sol", 2)];
        let (conclusion, output) = evaluate(&findings, Severity::High);
        assert_eq!(conclusion, CheckConclusion::Success);
        assert!(output.title.contains("none blocking"));
    }

    #[test]
    fn test_evaluate_clean_scan() {
        let (conclusion, output) = evaluate(&[], Severity::High);
        assert_eq!(conclusion, CheckConclusion::Success);
        assert_eq!(output.title, "No new security issues found");
        assert!(output.text.is_none());
        assert!(output.annotations.is_empty());
    }

    #[test]
    fn test_evaluate_informational_blocks_only_when_asked() {
        let findings = vec![finding(Severity::Informational, "a.sol", 3)];
        let (low, _) = evaluate(&findings, Severity::Low);
        assert_eq!(low, CheckConclusion::Success);
        let (info, _) = evaluate(&findings, Severity::Informational);
        assert_eq!(info, CheckConclusion::Failure);
    }

    #[test]
    fn test_annotations_skip_unlocated_findings() {
        let findings = vec![
            finding(Severity::High, "a.sol", 10),
            finding(Severity::High, "", 10),
            finding(Severity::Low, "b.sol", 0),
        ];
        let annotations = build_annotations(&findings);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].path, "a.sol");
        assert_eq!(annotations[0].annotation_level, "failure");
    }

    #[test]
    fn test_annotations_capped_at_fifty() {
        let findings: Vec<Finding> = (1..=80)
            .map(|line| finding(Severity::Medium, "a.sol", line))
            .collect();
        let annotations = build_annotations(&findings);
        assert_eq!(annotations.len(), MAX_ANNOTATIONS);
        assert!(annotations.iter().all(|a| a.annotation_level == "warning"));
    }
}
