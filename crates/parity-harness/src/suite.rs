//! Parity suite: two comparison profiles plus the resource diff
//!
//! Each sub-run is a separate invocation of the harness binary so that it
//! owns its processes and ports from start to finish. The suite only reads
//! back the summaries those runs persisted.

use crate::config::{DefaultPaths, Profile, SUITE_REPORT_JSON, SUITE_REPORT_MD};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{write_report_pair, RunSummary};
use crate::resources::ResourceSummary;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Which sub-runs to perform, and whether to gate on the result
#[derive(Debug, Clone, Copy, Default)]
pub struct SuiteOptions {
    pub skip_code_parity: bool,
    pub skip_repo_parity: bool,
    pub skip_resource_diff: bool,
    /// Fail unless code-parity is PASS-only (excluding SKIP)
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrictReason {
    NotEnabled,
    CodeParitySkipped,
    Pass,
    CodeParityNotClean,
}

impl fmt::Display for StrictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrictReason::NotEnabled => write!(f, "not_enabled"),
            StrictReason::CodeParitySkipped => write!(f, "code_parity_skipped"),
            StrictReason::Pass => write!(f, "pass"),
            StrictReason::CodeParityNotClean => write!(f, "code_parity_not_clean"),
        }
    }
}

/// Outcome of the strict gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrictResult {
    pub enabled: bool,
    pub ok: bool,
    pub reason: StrictReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pass: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_pass: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl StrictResult {
    fn verdict(enabled: bool, ok: bool, reason: StrictReason) -> Self {
        Self {
            enabled,
            ok,
            reason,
            expected_pass: None,
            actual_pass: None,
            partial: None,
            fail: None,
            skip: None,
            total: None,
        }
    }

    /// True when the gate demands a non-zero exit
    pub fn failed(&self) -> bool {
        self.enabled && !self.ok
    }
}

impl fmt::Display for StrictResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enabled={} ok={} reason={}", self.enabled, self.ok, self.reason)?;
        if let (Some(expected), Some(actual)) = (self.expected_pass, self.actual_pass) {
            write!(f, " expected_pass={} actual_pass={}", expected, actual)?;
        }
        Ok(())
    }
}

/// Apply the strict gate to the code-parity summary
pub fn evaluate_strict(
    enabled: bool,
    code_parity_skipped: bool,
    code: Option<&RunSummary>,
) -> StrictResult {
    if !enabled {
        return StrictResult::verdict(false, true, StrictReason::NotEnabled);
    }
    if code_parity_skipped {
        return StrictResult::verdict(true, false, StrictReason::CodeParitySkipped);
    }

    let s = code.copied().unwrap_or_default();
    let expected_pass = s.total.saturating_sub(s.skip);
    let ok = s.partial == 0 && s.fail == 0 && s.pass == expected_pass;

    StrictResult {
        enabled: true,
        ok,
        reason: if ok {
            StrictReason::Pass
        } else {
            StrictReason::CodeParityNotClean
        },
        expected_pass: Some(expected_pass),
        actual_pass: Some(s.pass),
        partial: Some(s.partial),
        fail: Some(s.fail),
        skip: Some(s.skip),
        total: Some(s.total),
    }
}

/// Combined view over the three sub-runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub generated_at: String,
    pub code_parity: Option<RunSummary>,
    pub repo_parity: Option<RunSummary>,
    pub resource_diff: Option<ResourceSummary>,
    pub strict: StrictResult,
    pub source_reports: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct SummaryOnly<T> {
    #[serde(default)]
    summary: T,
}

/// Read the `summary` field of a persisted report.
///
/// A report that was just produced must exist; a report from a skipped
/// sub-run is used only if an earlier run left one behind.
pub fn read_summary<T>(path: &Path, required: bool) -> HarnessResult<Option<T>>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        if required {
            return Err(HarnessError::ReportNotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| HarnessError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let parsed: SummaryOnly<T> =
        serde_json::from_str(&content).map_err(|e| HarnessError::ParseReport {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(Some(parsed.summary))
}

/// Run `exe args...`, failing on a non-zero exit
async fn run_sub(exe: &Path, args: &[&str], paths: &DefaultPaths) -> HarnessResult<()> {
    let command = format!("{} {}", exe.display(), args.join(" "));
    info!("Running {}", command);

    let status = Command::new(exe)
        .args(args)
        .env("PARITY_REPORT_DIR", &paths.report_dir)
        .status()
        .await
        .map_err(|e| HarnessError::Spawn {
            service: "suite".to_string(),
            program: exe.display().to_string(),
            source: e,
        })?;

    if !status.success() {
        return Err(HarnessError::CommandFailed {
            command,
            code: status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
        });
    }
    Ok(())
}

/// Result of a suite invocation
#[derive(Debug)]
pub struct SuiteOutcome {
    pub summary: SuiteSummary,
    pub json_path: PathBuf,
    pub md_path: PathBuf,
}

/// Run the suite by invoking `exe` for each enabled sub-run
pub async fn run_suite(
    options: SuiteOptions,
    paths: &DefaultPaths,
    exe: &Path,
) -> HarnessResult<SuiteOutcome> {
    if !options.skip_code_parity {
        run_sub(exe, &["compare", "--profile", Profile::CodeParity.as_str()], paths).await?;
    }
    if !options.skip_repo_parity {
        run_sub(exe, &["compare", "--profile", Profile::RepoParity.as_str()], paths).await?;
    }
    if !options.skip_resource_diff {
        run_sub(exe, &["resource-diff"], paths).await?;
    }

    let summary = collect_summary(options, paths)?;
    let (json_path, md_path) = write_report_pair(
        &paths.suite_out_dir(),
        SUITE_REPORT_JSON,
        SUITE_REPORT_MD,
        &summary,
        &render_suite_markdown(&summary),
    )?;

    Ok(SuiteOutcome {
        summary,
        json_path,
        md_path,
    })
}

/// Read back the persisted summaries and apply the strict gate
pub fn collect_summary(options: SuiteOptions, paths: &DefaultPaths) -> HarnessResult<SuiteSummary> {
    let code_report = paths.compat_report(Profile::CodeParity);
    let repo_report = paths.compat_report(Profile::RepoParity);
    let resource_report = paths.resource_report();

    let code_parity: Option<RunSummary> = read_summary(&code_report, !options.skip_code_parity)?;
    let repo_parity: Option<RunSummary> = read_summary(&repo_report, !options.skip_repo_parity)?;
    let resource_diff: Option<ResourceSummary> =
        read_summary(&resource_report, !options.skip_resource_diff)?;

    let strict = evaluate_strict(
        options.strict,
        options.skip_code_parity,
        code_parity.as_ref(),
    );

    Ok(SuiteSummary {
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        code_parity,
        repo_parity,
        resource_diff,
        strict,
        source_reports: vec![code_report, repo_report, resource_report],
    })
}

fn or_absent<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "(not available)".to_string(), |v| v.to_string())
}

pub fn render_suite_markdown(summary: &SuiteSummary) -> String {
    let mut out = String::new();

    out.push_str("# Parity Suite Summary\n\n");
    let _ = writeln!(out, "- Generated at: {}", summary.generated_at);
    let _ = writeln!(out, "- Code parity: {}", or_absent(&summary.code_parity));
    let _ = writeln!(out, "- Repo parity: {}", or_absent(&summary.repo_parity));
    let _ = writeln!(out, "- Resource diff: {}\n", or_absent(&summary.resource_diff));
    if summary.strict.enabled {
        let _ = writeln!(out, "- Strict mode: {}\n", summary.strict);
    }

    out.push_str("## Source Reports\n\n");
    for path in &summary.source_reports {
        let _ = writeln!(out, "- `{}`", path.display());
    }

    out
}
