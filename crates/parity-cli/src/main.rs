//! Subconverter parity CLI
//!
//! Entry point for comparison runs, resource diffs and the combined suite.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parity_harness::config::{
    CompareSettings, DefaultPaths, OrigMode, Profile, DEFAULT_ORIG_PORT, DEFAULT_RS_PORT,
};
use parity_harness::harness::run_compare;
use parity_harness::resources::{diff_resources, write_resource_report};
use parity_harness::suite::{run_suite, SuiteOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Args)]
struct CompareArgs {
    #[clap(long, default_value_t = DEFAULT_ORIG_PORT)]
    orig_port: u16,
    #[clap(long, default_value_t = DEFAULT_RS_PORT)]
    rs_port: u16,
    /// Named defaults for the subconverter-rs config, workdir and output dir
    #[clap(long, default_value = "custom")]
    profile: Profile,
    #[clap(long)]
    out_dir: Option<PathBuf>,
    #[clap(long)]
    rs_config: Option<PathBuf>,
    #[clap(long)]
    rs_workdir: Option<PathBuf>,
    /// Path to the subconverter-rs binary
    #[clap(long)]
    rs_bin: Option<PathBuf>,
    /// How to start the original subconverter
    #[clap(long, default_value = "local")]
    orig_mode: OrigMode,
    /// Path to original subconverter binary when --orig-mode=local
    #[clap(long)]
    orig_bin: Option<PathBuf>,
    /// Path to original subconverter config when --orig-mode=local
    #[clap(long)]
    orig_config: Option<PathBuf>,
    /// Working directory for original subconverter when --orig-mode=local
    #[clap(long)]
    orig_workdir: Option<PathBuf>,
    /// Image used when --orig-mode=docker
    #[clap(long)]
    docker_image: Option<String>,
    /// Use already running services
    #[clap(long)]
    no_start: bool,
    /// Do not stop services after compare
    #[clap(long)]
    keep_running: bool,
}

impl CompareArgs {
    fn into_settings(self, paths: &DefaultPaths) -> CompareSettings {
        let mut s = CompareSettings::for_profile(self.profile, paths);
        s.orig_port = self.orig_port;
        s.rs_port = self.rs_port;
        s.orig_mode = self.orig_mode;
        s.no_start = self.no_start;
        s.keep_running = self.keep_running;
        if let Some(v) = self.out_dir {
            s.out_dir = v;
        }
        if let Some(v) = self.rs_config {
            s.rs_config = v;
        }
        if let Some(v) = self.rs_workdir {
            s.rs_workdir = v;
        }
        if let Some(v) = self.rs_bin {
            s.rs_bin = v;
        }
        if let Some(v) = self.orig_bin {
            s.orig_bin = v;
        }
        if let Some(v) = self.orig_config {
            s.orig_config = v;
        }
        if let Some(v) = self.orig_workdir {
            s.orig_workdir = v;
        }
        if let Some(v) = self.docker_image {
            s.docker_image = v;
        }
        s
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Semantic parity compare: subconverter vs subconverter-rs
    Compare(CompareArgs),
    /// Compare repo resource files against release resource files
    ResourceDiff {
        #[clap(long)]
        repo_root: Option<PathBuf>,
        #[clap(long)]
        release_root: Option<PathBuf>,
        #[clap(long)]
        out_dir: Option<PathBuf>,
    },
    /// Run parity suite (code/repo parity + resource diff)
    Suite {
        #[clap(long)]
        skip_code_parity: bool,
        #[clap(long)]
        skip_repo_parity: bool,
        #[clap(long)]
        skip_resource_diff: bool,
        /// Fail when code-parity summary is not PASS-only (excluding SKIP)
        #[clap(long)]
        strict: bool,
    },
}

#[derive(Parser)]
#[clap(version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let paths = DefaultPaths::from_env();

    match cli.command {
        Command::Compare(args) => {
            let settings = args.into_settings(&paths);
            info!("Comparing with profile {}", settings.profile);
            let outcome = run_compare(&settings).await?;

            println!("[ok] report json: {}", outcome.json_path.display());
            println!("[ok] report md:   {}", outcome.md_path.display());
            println!("[ok] summary: {}", outcome.report.summary);
        }
        Command::ResourceDiff {
            repo_root,
            release_root,
            out_dir,
        } => {
            let repo_root = repo_root.unwrap_or_else(|| paths.repo_resource_root());
            let release_root = release_root.unwrap_or_else(|| paths.release_root.clone());
            let out_dir = out_dir.unwrap_or_else(|| paths.resource_out_dir());

            let report = diff_resources(&repo_root, &release_root)?;
            let (json_path, md_path) = write_resource_report(&report, &out_dir)?;

            println!("[ok] report json: {}", json_path.display());
            println!("[ok] report md:   {}", md_path.display());
            println!("[ok] summary: {}", report.summary);
        }
        Command::Suite {
            skip_code_parity,
            skip_repo_parity,
            skip_resource_diff,
            strict,
        } => {
            let options = SuiteOptions {
                skip_code_parity,
                skip_repo_parity,
                skip_resource_diff,
                strict,
            };
            let exe = std::env::current_exe().context("cannot locate harness executable")?;
            let outcome = run_suite(options, &paths, &exe).await?;
            let s = &outcome.summary;

            println!("[ok] suite summary json: {}", outcome.json_path.display());
            println!("[ok] suite summary md:   {}", outcome.md_path.display());
            for (label, value) in [("code parity", &s.code_parity), ("repo parity", &s.repo_parity)] {
                match value {
                    Some(v) => println!("[ok] {}: {}", label, v),
                    None => println!("[ok] {}: (not available)", label),
                }
            }
            match &s.resource_diff {
                Some(v) => println!("[ok] resource diff: {}", v),
                None => println!("[ok] resource diff: (not available)"),
            }

            if s.strict.failed() {
                error!("strict check failed: {}", s.strict);
                println!("[error] strict check failed: {}", s.strict);
                return Ok(ExitCode::FAILURE);
            }
            if s.strict.enabled {
                println!("[ok] strict check: {}", s.strict);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> DefaultPaths {
        DefaultPaths {
            rs_root: PathBuf::from("/rs"),
            release_root: PathBuf::from("/release"),
            report_dir: PathBuf::from("reports"),
            rs_bin: PathBuf::from("/rs/bin"),
            docker_image: "img".to_string(),
        }
    }

    fn compare_settings(args: &[&str]) -> CompareSettings {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Compare(args) => args.into_settings(&paths()),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_profile_defaults_apply() {
        let s = compare_settings(&["subconverter-parity", "compare", "--profile", "code-parity"]);
        assert_eq!(s.profile, Profile::CodeParity);
        assert_eq!(s.out_dir, PathBuf::from("reports/code"));
        assert_eq!(s.rs_config, PathBuf::from("/release/pref.example.ini"));
        assert_eq!(s.orig_port, DEFAULT_ORIG_PORT);
        assert!(!s.no_start);
    }

    #[test]
    fn test_explicit_flags_override_profile() {
        let s = compare_settings(&[
            "subconverter-parity",
            "compare",
            "--profile",
            "repo-parity",
            "--rs-config",
            "/tmp/pref.ini",
            "--out-dir",
            "out",
            "--orig-mode",
            "docker",
            "--rs-port",
            "20001",
            "--no-start",
            "--keep-running",
        ]);
        assert_eq!(s.rs_config, PathBuf::from("/tmp/pref.ini"));
        assert_eq!(s.rs_workdir, PathBuf::from("/rs"));
        assert_eq!(s.out_dir, PathBuf::from("out"));
        assert_eq!(s.orig_mode, OrigMode::Docker);
        assert_eq!(s.rs_port, 20001);
        assert!(s.no_start && s.keep_running);
    }

    #[test]
    fn test_rejects_unknown_profile() {
        assert!(Cli::try_parse_from(["subconverter-parity", "compare", "--profile", "nightly"]).is_err());
    }

    #[test]
    fn test_suite_flags() {
        let cli = Cli::try_parse_from(["subconverter-parity", "suite", "--strict", "--skip-repo-parity"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Suite {
                strict: true,
                skip_repo_parity: true,
                skip_code_parity: false,
                ..
            }
        ));
    }
}
