use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::event_log::{EventLog, Level};
use crate::locator::{DeploymentLayout, Locator};
use crate::port;
use crate::readiness::{self, ReadinessPolicy};
use crate::supervisor::{ExitWatch, LaunchSpec, ProcessSupervisor};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    LocatingPaths,
    AllocatingPort,
    Spawning,
    AwaitingReady,
    Ready,
    ShuttingDown,
    Stopped,
    Errored,
}

/// What the controller needs from the window side of the app
pub trait ShellHost: Send + Sync {
    /// Show the backend's UI in the main window
    fn load_url(&self, url: &str) -> Result<(), ShellError>;
    /// Blocking error dialog
    fn show_error(&self, title: &str, message: &str);
    fn quit(&self);
}

#[derive(Debug, Clone)]
struct ResolvedPaths {
    layout: DeploymentLayout,
    executable: PathBuf,
    script: PathBuf,
}

/// Snapshot handed to the front end
#[derive(Debug, Clone, Serialize)]
pub struct ShellStatus {
    pub state: LifecycleState,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub pid: Option<u32>,
    pub layout: Option<DeploymentLayout>,
    pub executable: Option<String>,
    pub entry_script: Option<String>,
    pub log_path: String,
    pub events: Vec<String>,
}

/// Drives the backend from "app is up" to "UI is showing" and back down.
///
/// Startup is strictly linear: paths, port, spawn, readiness. The first
/// failing step ends the run. Shutdown may be triggered by several
/// app events and is idempotent.
pub struct LifecycleController {
    config: ShellConfig,
    locator: Locator,
    log: EventLog,
    state: Mutex<LifecycleState>,
    paths: OnceLock<ResolvedPaths>,
    port: Mutex<Option<u16>>,
    supervisor: ProcessSupervisor,
    /// Last backend started by this controller, kept after it exits
    launched: Mutex<Option<ExitWatch>>,
}

impl LifecycleController {
    pub fn new(config: ShellConfig, locator: Locator) -> Self {
        let log = EventLog::new();
        log.record("=== sbss starting ===");
        log.record(format!(
            "platform: {} ({})",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        Self {
            config,
            locator,
            log,
            state: Mutex::new(LifecycleState::Idle),
            paths: OnceLock::new(),
            port: Mutex::new(None),
            supervisor: ProcessSupervisor::new(),
            launched: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn port(&self) -> Option<u16> {
        *self.port.lock()
    }

    /// The most recently started backend, running or not
    pub fn backend(&self) -> Option<ExitWatch> {
        self.launched.lock().clone()
    }

    pub fn status(&self) -> ShellStatus {
        let port = self.port();
        let paths = self.paths.get();
        ShellStatus {
            state: self.state(),
            port,
            url: port.map(readiness::root_url),
            pid: self.supervisor.current().map(|backend| backend.pid()),
            layout: paths.map(|p| p.layout),
            executable: paths.map(|p| p.executable.display().to_string()),
            entry_script: paths.map(|p| p.script.display().to_string()),
            log_path: self.config.log_path().display().to_string(),
            events: self.log.snapshot().iter().map(|e| e.render()).collect(),
        }
    }

    fn advance(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        let stopping = |s: LifecycleState| {
            matches!(s, LifecycleState::ShuttingDown | LifecycleState::Stopped)
        };
        // Once shutdown has begun, startup steps can no longer move the state
        if stopping(*state) && !stopping(next) {
            return;
        }
        log::debug!("[Lifecycle] {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn is_stopping(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    /// Run the whole startup sequence and show the UI. On failure the log
    /// is persisted, the error is shown and the app is asked to quit.
    pub async fn start(&self, host: &dyn ShellHost) -> Result<String, ShellError> {
        match self.bring_up().await {
            Ok(url) => {
                self.advance(LifecycleState::Ready);
                if self.is_stopping() {
                    return Ok(url);
                }
                self.log.record(format!("loading URL: {}", url));
                if let Err(e) = host.load_url(&url) {
                    self.present(host, &e);
                }
                Ok(url)
            }
            Err(e) => {
                self.abort(host, &e);
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<String, ShellError> {
        self.advance(LifecycleState::LocatingPaths);
        let paths = self.locate().clone();

        self.advance(LifecycleState::AllocatingPort);
        let port = port::find_free_port(self.config.base_port, &self.log).await?;
        *self.port.lock() = Some(port);
        self.log.record(format!("using port: {}", port));

        self.ensure_not_stopping()?;
        self.advance(LifecycleState::Spawning);
        let spec = LaunchSpec {
            executable: paths.executable,
            script: paths.script,
            port,
        };
        let backend = self.supervisor.spawn(&spec, &self.log)?;
        *self.launched.lock() = Some(backend.clone());
        // Shutdown may have run while the process was being created
        self.ensure_not_stopping()?;

        self.advance(LifecycleState::AwaitingReady);
        self.log.record("waiting for backend...");
        let policy = ReadinessPolicy::from(&self.config);
        // A backend that dies early should fail startup now, not at the timeout
        tokio::select! {
            ready = readiness::wait_until_ready(port, policy) => {
                let elapsed = ready?;
                self.log.record(format!("backend ready ({} ms)", elapsed.as_millis()));
            }
            crash = wait_for_crash(&backend) => return Err(crash),
        }

        Ok(readiness::root_url(port))
    }

    fn ensure_not_stopping(&self) -> Result<(), ShellError> {
        if self.is_stopping() {
            return Err(ShellError::Cancelled);
        }
        Ok(())
    }

    /// Resolve interpreter and entry script; only the first call does work
    fn locate(&self) -> &ResolvedPaths {
        self.paths.get_or_init(|| {
            let executable = self.locator.resolve_executable(&self.log);
            let script = self.locator.resolve_entry_script();
            self.log.record(format!("python path: {}", executable.path.display()));
            self.log.record(format!("web.py path: {}", script.display()));
            self.log.record(format!("packaged: {}", self.locator.is_packaged()));
            self.log.record(format!("layout: {:?}", executable.layout));
            ResolvedPaths {
                layout: executable.layout,
                executable: executable.path,
                script,
            }
        })
    }

    fn abort(&self, host: &dyn ShellHost, err: &ShellError) {
        if self.is_stopping() {
            // App is already going down, nobody is waiting for a dialog
            log::warn!("[Lifecycle] startup interrupted by shutdown: {}", err);
            self.supervisor.terminate(&self.log);
            self.log.flush(&self.config.log_path());
            return;
        }
        self.advance(LifecycleState::Errored);
        self.log.record_at(Level::Error, format!("startup failed: {}", err));
        self.supervisor.terminate(&self.log);
        self.log.flush(&self.config.log_path());
        host.show_error(err.title(), &self.diagnostic(err));
        host.quit();
    }

    /// Report without quitting
    fn present(&self, host: &dyn ShellHost, err: &ShellError) {
        self.log.record_at(Level::Error, err.to_string());
        host.show_error(err.title(), &self.diagnostic(err));
    }

    fn diagnostic(&self, err: &ShellError) -> String {
        format!("{}\n\n=== startup log ===\n{}", err, self.log.render())
    }

    /// After `Ready`: wait for the backend to go away and report it if it
    /// crashed. The window is left as it is.
    pub async fn watch_backend(&self, host: &dyn ShellHost) {
        let Some(backend) = self.backend() else {
            return;
        };
        let record = backend.wait().await;
        if let Some(err) = backend.crash_error(&record) {
            if !self.is_stopping() {
                self.present(host, &err);
            }
        }
    }

    /// Stop the backend and persist the log. Any number of calls, in any
    /// state, with or without a running backend.
    pub fn shutdown(&self) {
        if self.state() != LifecycleState::Stopped {
            self.advance(LifecycleState::ShuttingDown);
            self.log.record("shutting down");
        }
        self.supervisor.terminate(&self.log);
        self.log.flush(&self.config.log_path());
        self.advance(LifecycleState::Stopped);
    }
}

/// Resolves only if the backend exits in a way that counts as a crash
async fn wait_for_crash(backend: &ExitWatch) -> ShellError {
    let record = backend.wait().await;
    match backend.crash_error(&record) {
        Some(err) => err,
        None => std::future::pending().await,
    }
}
