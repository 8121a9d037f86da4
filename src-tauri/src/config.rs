use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_PORT: u16 = 8080;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 300;
pub const DEFAULT_READY_PROBE_TIMEOUT_MS: u64 = 1_000;
pub const STARTUP_LOG_FILE: &str = "startup.log";
pub const WINDOW_TITLE: &str = "sbss - Android 自動工具";

const BASE_PORT_ENV: &str = "SBSS_BASE_PORT";
const READY_TIMEOUT_ENV: &str = "SBSS_READY_TIMEOUT_MS";
const READY_POLL_INTERVAL_ENV: &str = "SBSS_READY_POLL_INTERVAL_MS";
const READY_PROBE_TIMEOUT_ENV: &str = "SBSS_READY_PROBE_TIMEOUT_MS";
const PROJECT_ROOT_ENV: &str = "SBSS_PROJECT_ROOT";
const SYSTEM_PYTHON_ENV: &str = "SBSS_SYSTEM_PYTHON";

/// Runtime settings for the shell. Defaults match what the backend expects;
/// each can be overridden through an `SBSS_*` environment variable.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub base_port: u16,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub ready_probe_timeout: Duration,
    /// Where `startup.log` goes (the app data dir once Tauri is up)
    pub log_dir: PathBuf,
    /// Overrides the bare `python3`/`python` fallback command
    pub system_python: Option<String>,
    pub window_width: f64,
    pub window_height: f64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            ready_poll_interval: Duration::from_millis(DEFAULT_READY_POLL_INTERVAL_MS),
            ready_probe_timeout: Duration::from_millis(DEFAULT_READY_PROBE_TIMEOUT_MS),
            log_dir: std::env::temp_dir(),
            system_python: None,
            window_width: 1200.0,
            window_height: 800.0,
        }
    }
}

impl ShellConfig {
    pub fn from_env(log_dir: PathBuf) -> Self {
        let defaults = Self::default();
        Self {
            base_port: std::env::var(BASE_PORT_ENV)
                .ok()
                .and_then(|raw| raw.trim().parse::<u16>().ok())
                .filter(|port| *port > 0)
                .unwrap_or(defaults.base_port),
            ready_timeout: env_duration_ms(READY_TIMEOUT_ENV, DEFAULT_READY_TIMEOUT_MS, 1_000, 600_000),
            ready_poll_interval: env_duration_ms(
                READY_POLL_INTERVAL_ENV,
                DEFAULT_READY_POLL_INTERVAL_MS,
                50,
                10_000,
            ),
            ready_probe_timeout: env_duration_ms(
                READY_PROBE_TIMEOUT_ENV,
                DEFAULT_READY_PROBE_TIMEOUT_MS,
                100,
                30_000,
            ),
            log_dir,
            system_python: std::env::var(SYSTEM_PYTHON_ENV)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty()),
            ..defaults
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(STARTUP_LOG_FILE)
    }
}

/// Project root for development runs: `SBSS_PROJECT_ROOT` if set, otherwise
/// the directory above `src-tauri`.
pub fn project_root() -> PathBuf {
    if let Ok(raw) = std::env::var(PROJECT_ROOT_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn env_duration_ms(name: &str, default_ms: u64, min_ms: u64, max_ms: u64) -> Duration {
    let raw = std::env::var(name).ok();
    Duration::from_millis(parse_clamped_ms(raw.as_deref(), default_ms, min_ms, max_ms))
}

/// Parse a millisecond value, falling back to the default when it is missing
/// or garbage and clamping it into `[min_ms, max_ms]` otherwise.
pub fn parse_clamped_ms(raw: Option<&str>, default_ms: u64, min_ms: u64, max_ms: u64) -> u64 {
    match raw.map(str::trim).and_then(|value| value.parse::<u64>().ok()) {
        Some(value) => value.clamp(min_ms, max_ms),
        None => default_ms,
    }
}
