//! Static resource comparison between two trees
//!
//! Compares the snippet files and every ruleset they reference between a
//! subconverter-rs checkout (left) and a subconverter release (right). No
//! services are involved.

use crate::config::{RESOURCE_REPORT_JSON, RESOURCE_REPORT_MD};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{table_cell, write_report_pair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Snippet files compared by exact path
pub const SNIPPET_FILES: [&str; 2] = ["snippets/rulesets.txt", "snippets/groups.txt"];

/// Registry of ruleset files, read from the right-hand tree
pub const RULESET_REGISTRY: &str = "snippets/rulesets.txt";

/// Prefix marking a rule defined inline instead of in its own file
pub const INLINE_RULE_MARKER: &str = "[]";

/// Maximum number of differing lines kept per side
pub const SAMPLE_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Snippet,
    Ruleset,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Snippet => write!(f, "snippet"),
            ResourceKind::Ruleset => write!(f, "ruleset"),
        }
    }
}

/// Comparison of one file present (or not) in both trees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiffEntry {
    pub kind: ResourceKind,
    pub path: String,
    pub left: PathBuf,
    pub right: PathBuf,
    pub exists_left: bool,
    pub exists_right: bool,
    pub equal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_line_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_line_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_in_left: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_in_right: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_extra_in_left: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_extra_in_right: Vec<String>,
}

impl ResourceDiffEntry {
    pub fn is_missing(&self) -> bool {
        !self.exists_left || !self.exists_right
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSummary {
    pub total: usize,
    pub equal: usize,
    pub different: usize,
    pub missing: usize,
}

impl ResourceSummary {
    pub fn from_entries(entries: &[ResourceDiffEntry]) -> Self {
        Self {
            total: entries.len(),
            equal: entries.iter().filter(|e| e.equal).count(),
            different: entries.iter().filter(|e| !e.equal).count(),
            missing: entries.iter().filter(|e| e.is_missing()).count(),
        }
    }
}

impl fmt::Display for ResourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} equal={} different={} missing={}",
            self.total, self.equal, self.different, self.missing
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    pub repo_root: PathBuf,
    pub release_root: PathBuf,
    pub summary: ResourceSummary,
    pub entries: Vec<ResourceDiffEntry>,
}

/// Trimmed, non-blank lines
pub fn normalize_lines(content: &str) -> Vec<String> {
    content
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn read_lossy(path: &Path) -> HarnessResult<String> {
    let raw = fs::read(path).map_err(|e| HarnessError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Ruleset file paths listed in a `name,path` registry
pub fn parse_ruleset_paths(content: &str) -> Vec<String> {
    normalize_lines(content)
        .into_iter()
        .filter(|line| !line.starts_with(';') && !line.starts_with('#'))
        .filter_map(|line| {
            let (_, path) = line.split_once(',')?;
            let path = path.trim();
            (!path.starts_with(INLINE_RULE_MARKER)).then(|| path.to_string())
        })
        .collect()
}

/// Compare one relative path between two files
pub fn compare_file_pair(
    kind: ResourceKind,
    rel_path: &str,
    left: &Path,
    right: &Path,
) -> HarnessResult<ResourceDiffEntry> {
    let mut entry = ResourceDiffEntry {
        kind,
        path: rel_path.to_string(),
        left: left.to_path_buf(),
        right: right.to_path_buf(),
        exists_left: left.exists(),
        exists_right: right.exists(),
        equal: false,
        left_line_count: None,
        right_line_count: None,
        extra_in_left: None,
        extra_in_right: None,
        sample_extra_in_left: Vec::new(),
        sample_extra_in_right: Vec::new(),
    };
    if entry.is_missing() {
        return Ok(entry);
    }

    let left_lines = normalize_lines(&read_lossy(left)?);
    let right_lines = normalize_lines(&read_lossy(right)?);
    let left_set: BTreeSet<&str> = left_lines.iter().map(String::as_str).collect();
    let right_set: BTreeSet<&str> = right_lines.iter().map(String::as_str).collect();

    let only_left: Vec<&str> = left_set.difference(&right_set).copied().collect();
    let only_right: Vec<&str> = right_set.difference(&left_set).copied().collect();

    entry.equal = left_lines == right_lines;
    entry.left_line_count = Some(left_lines.len());
    entry.right_line_count = Some(right_lines.len());
    entry.extra_in_left = Some(only_left.len());
    entry.extra_in_right = Some(only_right.len());
    entry.sample_extra_in_left = sample(&only_left);
    entry.sample_extra_in_right = sample(&only_right);

    Ok(entry)
}

fn sample(lines: &[&str]) -> Vec<String> {
    lines.iter().take(SAMPLE_LIMIT).map(|s| s.to_string()).collect()
}

/// Compare the snippet files and every referenced ruleset
pub fn diff_resources(repo_root: &Path, release_root: &Path) -> HarnessResult<ResourceReport> {
    let mut entries = Vec::new();

    for rel_path in SNIPPET_FILES {
        entries.push(compare_file_pair(
            ResourceKind::Snippet,
            rel_path,
            &repo_root.join(rel_path),
            &release_root.join(rel_path),
        )?);
    }

    let registry = release_root.join(RULESET_REGISTRY);
    let ruleset_paths = if registry.exists() {
        parse_ruleset_paths(&read_lossy(&registry)?)
    } else {
        warn!("Ruleset registry {:?} not found; comparing snippets only", registry);
        Vec::new()
    };

    for rel_path in &ruleset_paths {
        entries.push(compare_file_pair(
            ResourceKind::Ruleset,
            rel_path,
            &repo_root.join(rel_path),
            &release_root.join(rel_path),
        )?);
    }

    let summary = ResourceSummary::from_entries(&entries);
    info!("Resource diff: {}", summary);

    Ok(ResourceReport {
        repo_root: repo_root.to_path_buf(),
        release_root: release_root.to_path_buf(),
        summary,
        entries,
    })
}

fn count_cell(value: Option<usize>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn render_resource_markdown(report: &ResourceReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    out.push_str("# Resource Diff Report\n\n");
    out.push_str("Repo resources compared with release resources.\n\n");
    let _ = writeln!(out, "- Repo root: `{}`", report.repo_root.display());
    let _ = writeln!(out, "- Release root: `{}`", report.release_root.display());
    let _ = writeln!(out, "- Total files: {}", s.total);
    let _ = writeln!(out, "- Equal: {}", s.equal);
    let _ = writeln!(out, "- Different: {}", s.different);
    let _ = writeln!(out, "- Missing: {}\n", s.missing);

    out.push_str("| Kind | Path | Equal | Repo lines | Release lines | Repo-only | Release-only |\n");
    out.push_str("| --- | --- | --- | ---: | ---: | ---: | ---: |\n");
    for e in &report.entries {
        let _ = writeln!(
            out,
            "| {} | `{}` | {} | {} | {} | {} | {} |",
            e.kind,
            table_cell(&e.path),
            e.equal,
            count_cell(e.left_line_count),
            count_cell(e.right_line_count),
            count_cell(e.extra_in_left),
            count_cell(e.extra_in_right)
        );
    }

    out
}

pub fn write_resource_report(
    report: &ResourceReport,
    dir: &Path,
) -> HarnessResult<(PathBuf, PathBuf)> {
    write_report_pair(
        dir,
        RESOURCE_REPORT_JSON,
        RESOURCE_REPORT_MD,
        report,
        &render_resource_markdown(report),
    )
}
