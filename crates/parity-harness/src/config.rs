//! Configuration for parity runs

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_ORIG_PORT: u16 = 19500;
pub const DEFAULT_RS_PORT: u16 = 19501;
pub const DEFAULT_DOCKER_IMAGE: &str = "tindy2013/subconverter:latest";

/// Port the reference service listens on inside its container
pub const CONTAINER_PORT: u16 = 25500;

pub const COMPAT_REPORT_JSON: &str = "compat_report.json";
pub const COMPAT_REPORT_MD: &str = "compat_report.md";
pub const RESOURCE_REPORT_JSON: &str = "resource_diff.json";
pub const RESOURCE_REPORT_MD: &str = "resource_diff.md";
pub const SUITE_REPORT_JSON: &str = "summary.json";
pub const SUITE_REPORT_MD: &str = "summary.md";

/// Filesystem locations the harness falls back to
#[derive(Debug, Clone)]
pub struct DefaultPaths {
    /// Checkout of subconverter-rs
    pub rs_root: PathBuf,
    /// Unpacked subconverter release
    pub release_root: PathBuf,
    /// Root of all generated reports
    pub report_dir: PathBuf,
    /// subconverter-rs server binary
    pub rs_bin: PathBuf,
    /// Image used when the reference runs in a container
    pub docker_image: String,
}

impl Default for DefaultPaths {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DefaultPaths {
    /// Load locations from environment variables
    pub fn from_env() -> Self {
        let rs_root = env::var("SUBCONVERTER_RS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/srv/work/subconverter-rs"));

        let rs_bin = env::var("SUBCONVERTER_RS_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rs_root.join("target").join("release").join("subconverter-rs"));

        Self {
            release_root: env::var("SUBCONVERTER_RELEASE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/subconverter-release/subconverter")),
            report_dir: env::var("PARITY_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scripts/parity-report")),
            docker_image: env::var("SUBCONVERTER_DOCKER_IMAGE")
                .unwrap_or_else(|_| DEFAULT_DOCKER_IMAGE.to_string()),
            rs_root,
            rs_bin,
        }
    }

    /// Config shipped in the subconverter-rs checkout
    pub fn repo_config(&self) -> PathBuf {
        self.rs_root.join("base").join("pref.example.ini")
    }

    /// Config shipped in the release
    pub fn release_config(&self) -> PathBuf {
        self.release_root.join("pref.example.ini")
    }

    /// Reference binary inside the release
    pub fn release_bin(&self) -> PathBuf {
        self.release_root.join("subconverter")
    }

    /// Resource root of the subconverter-rs checkout
    pub fn repo_resource_root(&self) -> PathBuf {
        self.rs_root.join("base")
    }

    pub fn resource_out_dir(&self) -> PathBuf {
        self.report_dir.join("resources")
    }

    pub fn suite_out_dir(&self) -> PathBuf {
        self.report_dir.join("suite")
    }

    /// JSON report written by a comparison run of `profile`
    pub fn compat_report(&self, profile: Profile) -> PathBuf {
        profile.out_dir(&self.report_dir).join(COMPAT_REPORT_JSON)
    }

    /// JSON report written by the resource diff
    pub fn resource_report(&self) -> PathBuf {
        self.resource_out_dir().join(RESOURCE_REPORT_JSON)
    }
}

/// Named comparison profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Candidate runs against the resources in its own repository
    RepoParity,
    /// Candidate runs against the release's resources, isolating code
    CodeParity,
    Custom,
}

impl Profile {
    /// Output directory for this profile under `report_dir`
    pub fn out_dir(&self, report_dir: &Path) -> PathBuf {
        match self {
            Profile::RepoParity => report_dir.join("repo"),
            Profile::CodeParity => report_dir.join("code"),
            Profile::Custom => report_dir.to_path_buf(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::RepoParity => "repo-parity",
            Profile::CodeParity => "code-parity",
            Profile::Custom => "custom",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repo-parity" => Ok(Profile::RepoParity),
            "code-parity" => Ok(Profile::CodeParity),
            "custom" => Ok(Profile::Custom),
            other => Err(format!(
                "unknown profile '{}' (expected repo-parity, code-parity or custom)",
                other
            )),
        }
    }
}

/// How the reference implementation is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrigMode {
    Local,
    Docker,
}

impl fmt::Display for OrigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrigMode::Local => write!(f, "local"),
            OrigMode::Docker => write!(f, "docker"),
        }
    }
}

impl FromStr for OrigMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(OrigMode::Local),
            "docker" => Ok(OrigMode::Docker),
            other => Err(format!("unknown mode '{}' (expected local or docker)", other)),
        }
    }
}

/// Fully resolved settings of one comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareSettings {
    pub profile: Profile,
    pub orig_port: u16,
    pub rs_port: u16,
    pub out_dir: PathBuf,
    pub rs_bin: PathBuf,
    pub rs_config: PathBuf,
    pub rs_workdir: PathBuf,
    pub orig_mode: OrigMode,
    pub orig_bin: PathBuf,
    pub orig_config: PathBuf,
    pub orig_workdir: PathBuf,
    pub docker_image: String,
    /// Use already running services
    pub no_start: bool,
    /// Leave services running after the run
    pub keep_running: bool,
}

impl CompareSettings {
    /// Defaults for `profile`; callers override individual fields afterwards
    pub fn for_profile(profile: Profile, paths: &DefaultPaths) -> Self {
        let (rs_config, rs_workdir) = match profile {
            Profile::CodeParity => (paths.release_config(), paths.release_root.clone()),
            Profile::RepoParity | Profile::Custom => (paths.repo_config(), paths.rs_root.clone()),
        };

        Self {
            profile,
            orig_port: DEFAULT_ORIG_PORT,
            rs_port: DEFAULT_RS_PORT,
            out_dir: profile.out_dir(&paths.report_dir),
            rs_bin: paths.rs_bin.clone(),
            rs_config,
            rs_workdir,
            orig_mode: OrigMode::Local,
            orig_bin: paths.release_bin(),
            orig_config: paths.release_config(),
            orig_workdir: paths.release_root.clone(),
            docker_image: paths.docker_image.clone(),
            no_start: false,
            keep_running: false,
        }
    }

    pub fn orig_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.orig_port)
    }

    pub fn rs_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rs_port)
    }
}
