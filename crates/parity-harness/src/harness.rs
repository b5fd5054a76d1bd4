//! Pairwise comparison of the two services

use crate::cases::{build_cases, CaseDefinition};
use crate::client::{HttpResult, ServiceClient, CASE_TIMEOUT};
use crate::compare::{semantic_equal, CompareMode, ContentKind};
use crate::config::CompareSettings;
use crate::error::HarnessResult;
use crate::launcher::{ensure_ready, ServiceSet, ORIG_SERVICE, READY_TIMEOUT, RS_SERVICE};
use crate::report::{write_run_report, RunReport, RunSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub const NOTE_REQUEST_ERROR: &str = "request_error";
pub const NOTE_ORIGINAL_INVALID: &str = "original_case_invalid";
pub const NOTE_RUST_HTTP_ERROR: &str = "rust_http_error";
pub const NOTE_SEMANTIC_MATCH: &str = "semantic_match";
pub const NOTE_SEMANTIC_DIFF: &str = "semantic_diff";

/// Verdict for one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Pass,
    Partial,
    Fail,
    Skip,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Pass => write!(f, "PASS"),
            CaseStatus::Partial => write!(f, "PARTIAL"),
            CaseStatus::Fail => write!(f, "FAIL"),
            CaseStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Outcome of one case, including both raw responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: String,
    pub feature: String,
    pub kind: ContentKind,
    pub path: String,
    pub original: HttpResult,
    pub candidate: HttpResult,
    pub status: CaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_mode: Option<CompareMode>,
    pub note: String,
}

/// Classify a pair of responses for `case`.
///
/// Priority: transport failure on either side, then a reference HTTP error
/// (the case does not apply), then a candidate HTTP error, then the
/// semantic evaluator.
pub fn classify(case: &CaseDefinition, original: HttpResult, candidate: HttpResult) -> CaseResult {
    let mut compare_mode = None;

    let (status, note) = if original.is_transport_error() || candidate.is_transport_error() {
        (CaseStatus::Fail, NOTE_REQUEST_ERROR.to_string())
    } else if original.is_http_error() {
        (CaseStatus::Skip, NOTE_ORIGINAL_INVALID.to_string())
    } else if candidate.is_http_error() {
        (CaseStatus::Fail, NOTE_RUST_HTTP_ERROR.to_string())
    } else {
        match semantic_equal(case.kind, &original.body, &candidate.body) {
            Ok(cmp) => {
                compare_mode = Some(cmp.mode);
                if cmp.equal {
                    (CaseStatus::Pass, NOTE_SEMANTIC_MATCH.to_string())
                } else {
                    (CaseStatus::Partial, NOTE_SEMANTIC_DIFF.to_string())
                }
            }
            Err(e) => (CaseStatus::Partial, format!("compare_error:{}", e)),
        }
    };

    CaseResult {
        id: case.id.clone(),
        feature: case.feature.clone(),
        kind: case.kind,
        path: case.path.clone(),
        original,
        candidate,
        status,
        compare_mode,
        note,
    }
}

/// Runs cases against both services
pub struct ParityHarness {
    pub reference: ServiceClient,
    pub candidate: ServiceClient,
    results: Vec<CaseResult>,
}

impl ParityHarness {
    pub fn new(reference: ServiceClient, candidate: ServiceClient) -> Self {
        Self {
            reference,
            candidate,
            results: Vec::new(),
        }
    }

    /// Clients for the loopback ports in `settings`
    pub fn from_settings(settings: &CompareSettings) -> HarnessResult<Self> {
        Ok(Self::new(
            ServiceClient::new(ORIG_SERVICE, &settings.orig_base_url())?,
            ServiceClient::new(RS_SERVICE, &settings.rs_base_url())?,
        ))
    }

    /// Wait for both services to answer their readiness endpoints
    pub async fn wait_for_services(&self) -> HarnessResult<()> {
        ensure_ready(&self.reference, "/version", READY_TIMEOUT).await?;
        ensure_ready(&self.candidate, "/", READY_TIMEOUT).await
    }

    /// Probe both sides for `case` and record the verdict
    pub async fn run_case(&mut self, case: &CaseDefinition) -> &CaseResult {
        let original = self.reference.get(&case.path, CASE_TIMEOUT).await;
        let candidate = self.candidate.get(&case.path, CASE_TIMEOUT).await;

        let result = classify(case, original, candidate);
        debug!("{} -> {} ({})", result.id, result.status, result.note);
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Run `cases` in order
    pub async fn run_all(&mut self, cases: &[CaseDefinition]) {
        for case in cases {
            self.run_case(case).await;
        }
    }

    pub fn results(&self) -> &[CaseResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<CaseResult> {
        self.results
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }
}

/// Artifacts of a finished comparison run
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub json_path: PathBuf,
    pub md_path: PathBuf,
}

/// Full comparison run: launch, wait, compare, report, tear down.
///
/// Services are released on every path out of this function, including a
/// launch that failed halfway; with `keep_running` they are left up instead.
pub async fn run_compare(settings: &CompareSettings) -> HarnessResult<RunOutcome> {
    fs::create_dir_all(&settings.out_dir)?;

    let mut services = ServiceSet::new();
    let launched = if settings.no_start {
        Ok(())
    } else {
        services.launch(settings).await
    };

    let outcome = match launched {
        Ok(()) => compare_running(settings).await,
        Err(e) => Err(e),
    };
    services.release(settings.keep_running).await;
    outcome
}

async fn compare_running(settings: &CompareSettings) -> HarnessResult<RunOutcome> {
    let mut harness = ParityHarness::from_settings(settings)?;
    harness.wait_for_services().await?;

    let cases = build_cases();
    info!("Running {} cases ({})", cases.len(), settings.profile);
    harness.run_all(&cases).await;

    let report = RunReport::new(settings.clone(), harness.into_results());
    let (json_path, md_path) = write_run_report(&report, &settings.out_dir)?;
    info!("Summary: {}", report.summary);

    Ok(RunOutcome {
        report,
        json_path,
        md_path,
    })
}
