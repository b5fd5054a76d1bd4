//! Launching and tearing down the two services under comparison
//!
//! Both implementations sit behind [`ManagedService`], so the orchestration
//! code never branches on how a service was started. [`ServiceSet`] owns
//! every started service plus the scratch config and releases them exactly
//! once: explicitly through [`ServiceSet::release`], or from `Drop` if the
//! set goes out of scope on an error path.

use crate::client::ServiceClient;
use crate::config::{CompareSettings, OrigMode, CONTAINER_PORT};
use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Readiness deadline for each service
pub const READY_TIMEOUT: Duration = Duration::from_secs(45);

/// Grace period between terminate and kill
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub const ORIG_SERVICE: &str = "original subconverter";
pub const RS_SERVICE: &str = "subconverter-rs";

/// A service the harness can start and stop
#[async_trait]
pub trait ManagedService: Send {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Start the service; returns once the launch has been requested
    async fn start(&mut self) -> HarnessResult<()>;

    /// Stop the service. Best effort: failures are logged, never returned.
    async fn stop(&mut self);

    /// Synchronous last-resort stop used when the owner is dropped
    fn abort(&mut self);

    /// Forget the running service without stopping it
    fn detach(&mut self);
}

/// A service running as a local child process
pub struct LocalProcess {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    workdir: PathBuf,
    child: Option<Child>,
}

impl LocalProcess {
    pub fn new(name: &str, program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            workdir: workdir.into(),
            child: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// subconverter-rs reading the scratch config
    pub fn candidate(settings: &CompareSettings, config: &Path) -> Self {
        Self::new(RS_SERVICE, &settings.rs_bin, &settings.rs_workdir)
            .arg("--config")
            .arg(config.to_string_lossy())
            .arg("--address")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(settings.rs_port.to_string())
    }

    /// Original subconverter; the listen port comes from `PORT`
    pub fn reference(settings: &CompareSettings) -> Self {
        Self::new(ORIG_SERVICE, &settings.orig_bin, &settings.orig_workdir)
            .arg("-f")
            .arg(settings.orig_config.to_string_lossy())
            .env("PORT", settings.orig_port.to_string())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    #[cfg(unix)]
    fn terminate(child: &mut Child) {
        if let Some(pid) = child.id() {
            // SAFETY: signalling a pid we spawned and have not yet reaped.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                debug!("SIGTERM to {} failed, falling back to kill", pid);
                let _ = child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(child: &mut Child) {
        let _ = child.start_kill();
    }
}

#[async_trait]
impl ManagedService for LocalProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> HarnessResult<()> {
        debug!("Starting {}: {:?} {:?}", self.name, self.program, self.args);
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HarnessError::Spawn {
                service: self.name.clone(),
                program: self.program.display().to_string(),
                source: e,
            })?;

        info!("Started {} (pid {:?})", self.name, child.id());
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        Self::terminate(&mut child);
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited: {}", self.name, status),
            Ok(Err(e)) => warn!("Failed to wait for {}: {}", self.name, e),
            Err(_) => {
                warn!("{} did not exit within {:?}, killing", self.name, STOP_GRACE);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.name, e);
                }
            }
        }
    }

    fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill {}: {}", self.name, e);
            }
        }
    }

    fn detach(&mut self) {
        self.child = None;
    }
}

/// The reference service running in a container
pub struct Container {
    name: String,
    container_name: String,
    image: String,
    host_port: u16,
    started: bool,
}

impl Container {
    pub fn new(name: &str, image: &str, host_port: u16) -> Self {
        Self {
            name: name.to_string(),
            container_name: format!("subconverter-parity-{}", chrono::Utc::now().timestamp()),
            image: image.to_string(),
            host_port,
            started: false,
        }
    }

    pub fn reference(settings: &CompareSettings) -> Self {
        Self::new(ORIG_SERVICE, &settings.docker_image, settings.orig_port)
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn run_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
            "-p".to_string(),
            format!("{}:{}", self.host_port, CONTAINER_PORT),
            self.image.clone(),
        ]
    }
}

#[async_trait]
impl ManagedService for Container {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> HarnessResult<()> {
        let output = Command::new("docker")
            .args(self.run_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HarnessError::Spawn {
                service: self.name.clone(),
                program: "docker".to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(HarnessError::Container {
                name: self.container_name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Started container {} ({})", self.container_name, id);
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) {
        if !std::mem::take(&mut self.started) {
            return;
        }
        let status = Command::new("docker")
            .args(["rm", "-f", self.container_name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!("Failed to remove container {}: {}", self.container_name, e);
        }
    }

    fn abort(&mut self) {
        if !std::mem::take(&mut self.started) {
            return;
        }
        let status = std::process::Command::new("docker")
            .args(["rm", "-f", self.container_name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            warn!("Failed to remove container {}: {}", self.container_name, e);
        }
    }

    fn detach(&mut self) {
        self.started = false;
    }
}

/// Where config snippets live relative to the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetLayout {
    /// `snippets/` next to the config
    Root,
    /// `base/snippets/` next to the config
    Nested,
}

impl SnippetLayout {
    pub fn detect(config_dir: &Path) -> Self {
        if !config_dir.join("snippets").is_dir() && config_dir.join("base").join("snippets").is_dir()
        {
            SnippetLayout::Nested
        } else {
            SnippetLayout::Root
        }
    }
}

/// Point `!!import:` directives at the snippet layout in use
pub fn rewrite_imports(content: &str, layout: SnippetLayout) -> String {
    match layout {
        SnippetLayout::Root => content.to_string(),
        SnippetLayout::Nested => content.replace("!!import:snippets/", "!!import:base/snippets/"),
    }
}

/// Copy `source` into a scratch file with imports rewritten.
///
/// The returned path is deleted when dropped.
pub fn prepare_candidate_config(source: &Path) -> HarnessResult<TempPath> {
    let content = fs::read_to_string(source).map_err(|e| HarnessError::ReadFile {
        path: source.to_path_buf(),
        source: e,
    })?;

    let config_dir = source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let layout = SnippetLayout::detect(config_dir);
    debug!("Config {:?} uses {:?} snippet layout", source, layout);

    let scratch_err = |e| HarnessError::ScratchConfig {
        path: source.to_path_buf(),
        source: e,
    };
    let mut file = tempfile::Builder::new()
        .prefix("subconverter-rs-pref-")
        .suffix(".ini")
        .tempfile()
        .map_err(scratch_err)?;
    file.write_all(rewrite_imports(&content, layout).as_bytes())
        .map_err(scratch_err)?;
    file.flush().map_err(scratch_err)?;

    Ok(file.into_temp_path())
}

/// True when something accepts connections on `127.0.0.1:port`
pub async fn is_port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

async fn guard_port(service: &str, port: u16) -> HarnessResult<()> {
    if is_port_in_use(port).await {
        return Err(HarnessError::PortInUse {
            service: service.to_string(),
            port,
        });
    }
    Ok(())
}

/// Block until `client` answers on `path`, or fail after `budget`
pub async fn ensure_ready(client: &ServiceClient, path: &str, budget: Duration) -> HarnessResult<()> {
    info!("Waiting for {} at {}...", client.name(), client.base_url());
    if !client.wait_ready(path, budget).await {
        return Err(HarnessError::NotReady {
            service: client.name().to_string(),
            url: client.url(path),
            timeout: budget,
        });
    }
    info!("{} is ready", client.name());
    Ok(())
}

/// Services and scratch files owned by one run
pub struct ServiceSet {
    services: Vec<Box<dyn ManagedService>>,
    scratch_config: Option<TempPath>,
    released: bool,
}

impl Default for ServiceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceSet {
    /// An empty set, for runs against services that are already up
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            scratch_config: None,
            released: false,
        }
    }

    /// Guard both ports, then start the candidate and the reference.
    ///
    /// Whatever started before a failure stays in the set, so the caller
    /// still owns it and must [`release`](Self::release) it.
    pub async fn launch(&mut self, settings: &CompareSettings) -> HarnessResult<()> {
        guard_port(ORIG_SERVICE, settings.orig_port).await?;
        guard_port(RS_SERVICE, settings.rs_port).await?;

        let scratch = prepare_candidate_config(&settings.rs_config)?;
        let candidate = LocalProcess::candidate(settings, &scratch);
        self.scratch_config = Some(scratch);
        self.start(Box::new(candidate)).await?;

        let reference: Box<dyn ManagedService> = match settings.orig_mode {
            OrigMode::Local => Box::new(LocalProcess::reference(settings)),
            OrigMode::Docker => Box::new(Container::reference(settings)),
        };
        self.start(reference).await
    }

    /// Start `service` and take ownership of it
    pub async fn start(&mut self, mut service: Box<dyn ManagedService>) -> HarnessResult<()> {
        service.start().await?;
        self.services.push(service);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn scratch_config(&self) -> Option<&Path> {
        self.scratch_config.as_deref()
    }

    /// Stop everything (or leave it running when `keep_running`)
    pub async fn release(mut self, keep_running: bool) {
        self.released = true;

        if keep_running {
            for service in &mut self.services {
                info!("Leaving {} running", service.name());
                service.detach();
            }
            if let Some(scratch) = self.scratch_config.take() {
                match scratch.keep() {
                    Ok(path) => info!("Scratch config kept at {:?}", path),
                    Err(e) => warn!("Failed to keep scratch config: {}", e),
                }
            }
            return;
        }

        for service in self.services.iter_mut().rev() {
            info!("Stopping {}", service.name());
            service.stop().await;
        }
        if let Some(scratch) = self.scratch_config.take() {
            if let Err(e) = scratch.close() {
                warn!("Failed to remove scratch config: {}", e);
            }
        }
    }
}

// Only reached when the owner unwinds before calling `release`.
impl Drop for ServiceSet {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for service in self.services.iter_mut().rev() {
            warn!("Aborting {}", service.name());
            service.abort();
        }
        // scratch_config removes its file when dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultPaths, Profile};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn settings(dir: &Path) -> CompareSettings {
        let paths = DefaultPaths {
            rs_root: dir.join("rs"),
            release_root: dir.join("release"),
            report_dir: dir.join("reports"),
            rs_bin: dir.join("rs/bin"),
            docker_image: "image:tag".to_string(),
        };
        CompareSettings::for_profile(Profile::Custom, &paths)
    }

    #[derive(Default)]
    struct Counters {
        stops: AtomicUsize,
        aborts: AtomicUsize,
    }

    struct FakeService(Arc<Counters>);

    #[async_trait]
    impl ManagedService for FakeService {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(&mut self) -> HarnessResult<()> {
            Ok(())
        }

        async fn stop(&mut self) {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn abort(&mut self) {
            self.0.aborts.fetch_add(1, Ordering::SeqCst);
        }

        fn detach(&mut self) {}
    }

    struct BrokenService;

    #[async_trait]
    impl ManagedService for BrokenService {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&mut self) -> HarnessResult<()> {
            Err(HarnessError::Container {
                name: "broken".to_string(),
                reason: "no runtime".to_string(),
            })
        }

        async fn stop(&mut self) {}

        fn abort(&mut self) {}

        fn detach(&mut self) {}
    }

    #[test]
    fn test_rewrite_imports_nested() {
        let content = "[common]\nrulesets=!!import:snippets/rulesets.txt\n";
        assert_eq!(
            rewrite_imports(content, SnippetLayout::Nested),
            "[common]\nrulesets=!!import:base/snippets/rulesets.txt\n"
        );
        assert_eq!(rewrite_imports(content, SnippetLayout::Root), content);
    }

    #[test]
    fn test_detect_layout() {
        let dir = TempDir::new().unwrap();
        assert_eq!(SnippetLayout::detect(dir.path()), SnippetLayout::Root);

        fs::create_dir_all(dir.path().join("base/snippets")).unwrap();
        assert_eq!(SnippetLayout::detect(dir.path()), SnippetLayout::Nested);

        fs::create_dir_all(dir.path().join("snippets")).unwrap();
        assert_eq!(SnippetLayout::detect(dir.path()), SnippetLayout::Root);
    }

    #[test]
    fn test_prepare_config_leaves_source_untouched() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("base/snippets")).unwrap();
        let source = dir.path().join("pref.ini");
        let original = "a=!!import:snippets/groups.txt\n";
        fs::write(&source, original).unwrap();

        let scratch = prepare_candidate_config(&source).unwrap();
        let scratch_path = scratch.to_path_buf();
        assert_eq!(
            fs::read_to_string(&scratch_path).unwrap(),
            "a=!!import:base/snippets/groups.txt\n"
        );
        assert_eq!(fs::read_to_string(&source).unwrap(), original);

        drop(scratch);
        assert!(!scratch_path.exists());
    }

    #[test]
    fn test_prepare_config_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = prepare_candidate_config(&dir.path().join("missing.ini")).unwrap_err();
        assert!(matches!(err, HarnessError::ReadFile { .. }));
    }

    #[test]
    fn test_candidate_command_line() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.rs_port = 20001;
        let proc = LocalProcess::candidate(&s, Path::new("/tmp/x.ini"));
        assert_eq!(
            proc.args(),
            ["--config", "/tmp/x.ini", "--address", "127.0.0.1", "--port", "20001"]
        );
        assert!(proc.envs().is_empty());
    }

    #[test]
    fn test_reference_command_line() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(dir.path());
        s.orig_port = 20000;
        let proc = LocalProcess::reference(&s);
        assert_eq!(proc.args()[0], "-f");
        assert_eq!(proc.envs(), [("PORT".to_string(), "20000".to_string())]);
    }

    #[test]
    fn test_container_port_mapping() {
        let container = Container::new(ORIG_SERVICE, "image:tag", 20000);
        let args = container.run_args();
        assert!(args.contains(&"20000:25500".to_string()));
        assert_eq!(args.last().unwrap(), "image:tag");
        assert!(container.container_name().starts_with("subconverter-parity-"));
    }

    #[tokio::test]
    async fn test_port_guard_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port).await);
        assert!(matches!(
            guard_port("svc", port).await,
            Err(HarnessError::PortInUse { .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_refuses_bound_port() {
        let dir = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut s = settings(dir.path());
        s.orig_port = listener.local_addr().unwrap().port();

        let mut set = ServiceSet::new();
        let err = set.launch(&s).await.unwrap_err();
        assert!(matches!(err, HarnessError::PortInUse { port, .. } if port == s.orig_port));
        assert!(set.is_empty());
        assert!(set.scratch_config().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut service = LocalProcess::new("ghost", dir.path().join("no-such-binary"), dir.path());
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_release_stops_once() {
        let counters = Arc::new(Counters::default());
        let mut set = ServiceSet::new();
        set.start(Box::new(FakeService(counters.clone()))).await.unwrap();
        set.start(Box::new(FakeService(counters.clone()))).await.unwrap();
        assert_eq!(set.len(), 2);

        set.release(false).await;
        assert_eq!(counters.stops.load(Ordering::SeqCst), 2);
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_aborts_unreleased() {
        let counters = Arc::new(Counters::default());
        {
            let mut set = ServiceSet::new();
            set.start(Box::new(FakeService(counters.clone()))).await.unwrap();
        }
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keep_running_skips_stop() {
        let counters = Arc::new(Counters::default());
        let mut set = ServiceSet::new();
        set.start(Box::new(FakeService(counters.clone()))).await.unwrap();

        set.release(true).await;
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_start_keeps_earlier_services_for_release() {
        let counters = Arc::new(Counters::default());
        let mut set = ServiceSet::new();
        set.start(Box::new(FakeService(counters.clone()))).await.unwrap();

        let err = set.start(Box::new(BrokenService)).await.unwrap_err();
        assert!(matches!(err, HarnessError::Container { .. }));
        assert_eq!(set.len(), 1);

        set.release(false).await;
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_reference_binary_stops_candidate_gracefully() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("terminated");
        let script = dir.path().join("candidate.sh");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\ntrap 'touch {}; exit 0' TERM\ntouch {}.up\nwhile :; do sleep 0.05; done\n",
                marker.display(),
                marker.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let config = dir.path().join("pref.ini");
        fs::write(&config, "[common]\n").unwrap();

        let mut s = settings(dir.path());
        s.rs_bin = script.clone();
        s.rs_config = config;
        s.rs_workdir = dir.path().to_path_buf();
        s.orig_bin = dir.path().join("missing/subconverter");
        s.orig_workdir = dir.path().to_path_buf();
        for port in [&mut s.orig_port, &mut s.rs_port] {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            *port = l.local_addr().unwrap().port();
        }

        let mut set = ServiceSet::new();
        let err = set.launch(&s).await.unwrap_err();
        assert!(
            matches!(&err, HarnessError::Spawn { service, .. } if service == ORIG_SERVICE),
            "unexpected error: {}",
            err
        );
        assert_eq!(set.len(), 1);

        // give the shell time to install its trap before it is signalled
        let up = dir.path().join("terminated.up");
        for _ in 0..100 {
            if up.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(up.exists());

        let scratch = set.scratch_config().unwrap().to_path_buf();
        set.release(false).await;
        assert!(marker.exists());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_ensure_ready_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ServiceClient::new("down", &format!("http://127.0.0.1:{}", port)).unwrap();
        let err = ensure_ready(&client, "/", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotReady { .. }));
    }
}
