//! Report aggregation and persistence
//!
//! Every run writes a JSON document for offline inspection and a Markdown
//! table for humans. Both go through [`write_atomic`], so a failed write
//! never leaves a truncated artifact behind.

use crate::config::{CompareSettings, Profile, COMPAT_REPORT_JSON, COMPAT_REPORT_MD};
use crate::error::{HarnessError, HarnessResult};
use crate::harness::{CaseResult, CaseStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-status counts of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(rename = "PASS", default)]
    pub pass: usize,
    #[serde(rename = "PARTIAL", default)]
    pub partial: usize,
    #[serde(rename = "FAIL", default)]
    pub fail: usize,
    #[serde(rename = "SKIP", default)]
    pub skip: usize,
    #[serde(default)]
    pub total: usize,
}

impl RunSummary {
    pub fn from_results(results: &[CaseResult]) -> Self {
        let count = |status: CaseStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            pass: count(CaseStatus::Pass),
            partial: count(CaseStatus::Partial),
            fail: count(CaseStatus::Fail),
            skip: count(CaseStatus::Skip),
            total: results.len(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PASS={} PARTIAL={} FAIL={} SKIP={} total={}",
            self.pass, self.partial, self.fail, self.skip, self.total
        )
    }
}

/// Everything a comparison run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub profile: Profile,
    pub settings: CompareSettings,
    pub summary: RunSummary,
    pub results: Vec<CaseResult>,
}

impl RunReport {
    pub fn new(settings: CompareSettings, results: Vec<CaseResult>) -> Self {
        Self {
            profile: settings.profile,
            summary: RunSummary::from_results(&results),
            settings,
            results,
        }
    }
}

/// Write `contents` to `path` via a sibling temp file and rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> HarnessResult<()> {
    let write_err = |e| HarnessError::WriteReport {
        path: path.to_path_buf(),
        source: e,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    file.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Write a JSON + Markdown pair into `dir`
pub fn write_report_pair<T: Serialize>(
    dir: &Path,
    json_name: &str,
    md_name: &str,
    document: &T,
    markdown: &str,
) -> HarnessResult<(PathBuf, PathBuf)> {
    let json_path = dir.join(json_name);
    let json = serde_json::to_string_pretty(document).map_err(|e| HarnessError::SerializeReport {
        path: json_path.clone(),
        source: e,
    })?;
    write_atomic(&json_path, json.as_bytes())?;

    let md_path = dir.join(md_name);
    write_atomic(&md_path, markdown.as_bytes())?;

    info!("Wrote {:?} and {:?}", json_path, md_path);
    Ok((json_path, md_path))
}

/// Persist a comparison run into `dir`
pub fn write_run_report(report: &RunReport, dir: &Path) -> HarnessResult<(PathBuf, PathBuf)> {
    write_report_pair(
        dir,
        COMPAT_REPORT_JSON,
        COMPAT_REPORT_MD,
        report,
        &render_run_markdown(report),
    )
}

/// Markdown table cells cannot contain pipes or line breaks
pub(crate) fn table_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

pub fn render_run_markdown(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    out.push_str("# Subconverter Parity Report\n\n");
    out.push_str("Semantic compare between original subconverter and subconverter-rs.\n\n");
    let _ = writeln!(out, "- Profile: {}", report.profile);
    let _ = writeln!(out, "- Rust config: `{}`", report.settings.rs_config.display());
    let _ = writeln!(out, "- Rust workdir: `{}`", report.settings.rs_workdir.display());
    let _ = writeln!(out, "- Original mode: {}", report.settings.orig_mode);
    let _ = writeln!(out, "- Total: {}", s.total);
    let _ = writeln!(out, "- PASS: {}", s.pass);
    let _ = writeln!(out, "- PARTIAL: {}", s.partial);
    let _ = writeln!(out, "- FAIL: {}", s.fail);
    let _ = writeln!(out, "- SKIP: {}\n", s.skip);

    out.push_str("| Case | Feature | Status | Original | Rust | Note |\n");
    out.push_str("| --- | --- | --- | --- | --- | --- |\n");
    for r in &report.results {
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} | {} |",
            r.id,
            table_cell(&r.feature),
            r.status,
            r.original.status,
            r.candidate.status,
            table_cell(&r.note)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseDefinition;
    use crate::client::HttpResult;
    use crate::compare::ContentKind;
    use crate::config::DefaultPaths;
    use crate::harness::classify;
    use tempfile::TempDir;

    fn settings() -> CompareSettings {
        let paths = DefaultPaths {
            rs_root: PathBuf::from("/rs"),
            release_root: PathBuf::from("/release"),
            report_dir: PathBuf::from("reports"),
            rs_bin: PathBuf::from("/rs/bin"),
            docker_image: "img".to_string(),
        };
        CompareSettings::for_profile(Profile::CodeParity, &paths)
    }

    fn results() -> Vec<CaseResult> {
        let case = |id: &str| CaseDefinition {
            id: id.to_string(),
            feature: "F".to_string(),
            kind: ContentKind::Text,
            path: "/".to_string(),
        };
        let ok = |b: &str| HttpResult::response(200, "", b);
        vec![
            classify(&case("a"), ok("x"), ok("x")),
            classify(&case("b"), ok("x"), ok("y")),
            classify(&case("c"), HttpResult::response(404, "", ""), ok("y")),
            classify(&case("d"), ok("x"), HttpResult::transport_error("refused")),
            classify(&case("e"), ok("x"), ok("x ")),
        ]
    }

    #[test]
    fn test_summary_counts_sum_to_total() {
        let s = RunSummary::from_results(&results());
        assert_eq!(s.pass, 2);
        assert_eq!(s.partial, 1);
        assert_eq!(s.skip, 1);
        assert_eq!(s.fail, 1);
        assert_eq!(s.pass + s.partial + s.fail + s.skip, s.total);
        assert_eq!(s.total, 5);
    }

    #[test]
    fn test_summary_json_keys() {
        let s = RunSummary::from_results(&results());
        let v = serde_json::to_value(s).unwrap();
        assert_eq!(v["PASS"], 2);
        assert_eq!(v["total"], 5);

        let parsed: RunSummary = serde_json::from_str(r#"{"PASS": 3}"#).unwrap();
        assert_eq!(parsed.pass, 3);
        assert_eq!(parsed.total, 0);
    }

    #[test]
    fn test_markdown_rows() {
        let report = RunReport::new(settings(), results());
        let md = render_run_markdown(&report);
        assert!(md.starts_with("# Subconverter Parity Report"));
        assert!(md.contains("- Profile: code-parity"));
        assert!(md.contains("| `c` | F | SKIP | 404 | 200 | original_case_invalid |"));
        assert!(md.contains("| `d` | F | FAIL | 200 | 0 | request_error |"));
    }

    #[test]
    fn test_table_cell_escapes() {
        assert_eq!(table_cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_write_run_report() {
        let dir = TempDir::new().unwrap();
        let report = RunReport::new(settings(), results());
        let (json_path, md_path) = write_run_report(&report, dir.path()).unwrap();

        assert_eq!(json_path, dir.path().join("compat_report.json"));
        let parsed: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.summary, report.summary);
        assert_eq!(parsed.results.len(), 5);
        assert_eq!(parsed.results[3].candidate.error, "refused");
        assert!(md_path.exists());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[test]
    fn test_write_atomic_fails_on_directory_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("occupied");
        std::fs::create_dir_all(target.join("child")).unwrap();

        let err = write_atomic(&target, b"data").unwrap_err();
        assert!(matches!(err, HarnessError::WriteReport { .. }));
        // only the pre-existing directory remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
