use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can stop the backend from coming up (or from being shown).
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("no free port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("backend executable does not exist: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("entry script does not exist: {}", .0.display())]
    MissingEntryScript(PathBuf),

    #[error("failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend exited with code {code}\n\n{output}")]
    BackendCrash { code: i32, output: String },

    #[error("backend did not become ready within {} ms", .elapsed.as_millis())]
    Timeout { elapsed: Duration },

    #[error("failed to load {url}: {reason}")]
    LoadFailure { url: String, reason: String },

    #[error("failed to build readiness client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("startup cancelled by shutdown")]
    Cancelled,
}

impl ShellError {
    /// Dialog title shown for this error
    pub fn title(&self) -> &'static str {
        match self {
            ShellError::BackendCrash { .. } => "Backend failed",
            ShellError::LoadFailure { .. } => "Page failed to load",
            _ => "Startup failed",
        }
    }
}
