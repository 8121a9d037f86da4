use crate::error::ShellError;
use crate::event_log::{EventLog, Level};
use crate::locator;
use crate::process_tree;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Environment variable the backend reads its listen port from
pub const PORT_ENV: &str = "FLASK_PORT";
pub const IO_ENCODING_ENV: &str = "PYTHONIOENCODING";

/// How long the exit monitor waits for the output readers to drain after
/// the process is gone. Forked children can keep the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub script: PathBuf,
    pub port: u16,
}

impl LaunchSpec {
    /// The backend runs next to its entry script
    pub fn working_dir(&self) -> PathBuf {
        match self.script.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Unbounded accumulator for one output stream of the backend
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    text: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn append_line(&self, line: &str) {
        let mut text = self.text.lock();
        text.push_str(line);
        text.push('\n');
    }

    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }

    pub fn is_blank(&self) -> bool {
        self.text.lock().trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitRecord {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

fn describe(value: Option<i32>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Stderr lines carrying one of these are the backend's normal startup
/// banner, not failures
const STDERR_INFO_MARKERS: &[&str] = &["WARNING", "Running on"];

pub fn classify_stderr(line: &str) -> Level {
    if STDERR_INFO_MARKERS.iter().any(|marker| line.contains(marker)) {
        Level::Info
    } else {
        Level::Error
    }
}

/// Read-only view of a running backend: its output so far and a way to wait
/// for it to exit. Handing one out does not give the holder a way to kill
/// the process; that stays with the supervisor.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    pid: u32,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    exit: watch::Receiver<Option<ExitRecord>>,
    terminate_requested: Arc<AtomicBool>,
}

impl ExitWatch {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn stdout(&self) -> &OutputBuffer {
        &self.stdout
    }

    pub fn stderr(&self) -> &OutputBuffer {
        &self.stderr
    }

    pub fn exit_record(&self) -> Option<ExitRecord> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_record().is_some()
    }

    /// Resolves once the process has exited and its output is drained
    pub async fn wait(&self) -> ExitRecord {
        let mut rx = self.exit.clone();
        let record = match rx.wait_for(Option::is_some).await {
            Ok(record) => *record,
            Err(_) => None,
        };
        // Monitor gone without reporting (runtime shutting down)
        record.unwrap_or(ExitRecord {
            code: None,
            signal: None,
        })
    }

    /// A non-zero exit code we did not cause. Signal deaths and our own
    /// terminate are not crashes.
    pub fn crash_error(&self, record: &ExitRecord) -> Option<ShellError> {
        if self.terminate_requested.load(Ordering::SeqCst) {
            return None;
        }
        match record.code {
            Some(code) if code != 0 => Some(ShellError::BackendCrash {
                code,
                output: self.crash_output(),
            }),
            _ => None,
        }
    }

    /// Stderr if there is any, else stdout, else a placeholder
    fn crash_output(&self) -> String {
        if !self.stderr.is_blank() {
            self.stderr.contents().trim_end().to_string()
        } else if !self.stdout.is_blank() {
            self.stdout.contents().trim_end().to_string()
        } else {
            "unknown error".to_string()
        }
    }
}

/// Owns the single backend process for this app instance
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    /// Live backend only; the exit monitor clears it once the process is gone
    current: Arc<Mutex<Option<ExitWatch>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ExitWatch> {
        self.current.lock().clone()
    }

    /// Start `<executable> <script>` with the port in the environment.
    /// Must be called from inside a tokio runtime.
    pub fn spawn(&self, spec: &LaunchSpec, log: &EventLog) -> Result<ExitWatch, ShellError> {
        if !locator::executable_exists(&spec.executable) {
            return Err(ShellError::MissingExecutable(spec.executable.clone()));
        }
        if !spec.script.exists() {
            return Err(ShellError::MissingEntryScript(spec.script.clone()));
        }

        // One backend per app instance
        self.terminate(log);

        let working_dir = spec.working_dir();
        log.record(format!("working directory: {}", working_dir.display()));

        let mut command = Command::new(&spec.executable);
        command
            .arg(&spec.script)
            .current_dir(&working_dir)
            .env(PORT_ENV, spec.port.to_string())
            .env(IO_ENCODING_ENV, "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process_tree::prepare(&mut command);

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            path: spec.executable.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        log.record(format!("backend started (pid={})", pid));

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, stdout.clone(), log.clone(), |_| Level::Info));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, stderr.clone(), log.clone(), classify_stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let watch = ExitWatch {
            pid,
            stdout,
            stderr,
            exit: exit_rx,
            terminate_requested: Arc::new(AtomicBool::new(false)),
        };
        // Registered before the monitor starts so a fast exit still clears it
        *self.current.lock() = Some(watch.clone());

        let monitor_log = log.clone();
        let current = Arc::clone(&self.current);
        tokio::spawn(async move {
            let record = match child.wait().await {
                Ok(status) => ExitRecord::from_status(status),
                Err(e) => {
                    monitor_log.record_at(Level::Error, format!("backend process error: {}", e));
                    ExitRecord {
                        code: None,
                        signal: None,
                    }
                }
            };
            let drain = drain_readers(readers);
            let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await;
            monitor_log.record(format!(
                "backend exited (code={}, signal={})",
                describe(record.code),
                describe(record.signal)
            ));
            {
                let mut current = current.lock();
                if current.as_ref().is_some_and(|live| live.pid == pid) {
                    *current = None;
                }
            }
            let _ = exit_tx.send(Some(record));
        });

        Ok(watch)
    }

    /// Stop the backend and its children. Safe to call any number of times,
    /// with or without a backend; failures are only logged.
    pub fn terminate(&self, log: &EventLog) {
        let Some(handle) = self.current.lock().take() else {
            return;
        };
        if handle.has_exited() {
            return;
        }
        handle.terminate_requested.store(true, Ordering::SeqCst);
        log.record("stopping backend...");
        if let Err(e) = process_tree::terminate_tree(handle.pid) {
            // Usually the process is already gone
            log::warn!("[Backend] terminate pid {} failed: {}", handle.pid, e);
        }
    }
}

async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.await;
    }
}

/// Forward each line of `pipe` into `buffer` and the event log
fn spawn_reader<R>(
    pipe: R,
    buffer: OutputBuffer,
    log: EventLog,
    classify: fn(&str) -> Level,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&raw);
                    let line = text.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    buffer.append_line(line);
                    match classify(line) {
                        Level::Error => log.record_at(Level::Error, format!("[backend error] {}", line)),
                        level => log.record_at(level, format!("[backend] {}", line)),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_banner_on_stderr_is_not_an_error() {
        assert_eq!(
            classify_stderr("WARNING: This is a development server."),
            Level::Info
        );
        assert_eq!(
            classify_stderr(" * Running on http://127.0.0.1:8080"),
            Level::Info
        );
        assert_eq!(
            classify_stderr("Traceback (most recent call last):"),
            Level::Error
        );
    }

    #[test]
    fn working_dir_is_script_parent() {
        let spec = LaunchSpec {
            executable: "python3".into(),
            script: PathBuf::from("/opt/sbss/web.py"),
            port: 8080,
        };
        assert_eq!(spec.working_dir(), PathBuf::from("/opt/sbss"));

        let bare = LaunchSpec {
            script: PathBuf::from("web.py"),
            ..spec
        };
        assert_eq!(bare.working_dir(), PathBuf::from("."));
    }

    #[test]
    fn terminate_without_backend_is_a_no_op() {
        let supervisor = ProcessSupervisor::new();
        let log = EventLog::new();
        supervisor.terminate(&log);
        supervisor.terminate(&log);
        assert!(log.is_empty());
        assert!(supervisor.current().is_none());
    }

    #[tokio::test]
    async fn missing_script_is_reported_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("python");
        std::fs::write(&exe, "").unwrap();

        let supervisor = ProcessSupervisor::new();
        let log = EventLog::new();
        let spec = LaunchSpec {
            executable: exe,
            script: dir.path().join("web.py"),
            port: 8080,
        };
        let err = supervisor.spawn(&spec, &log).unwrap_err();
        assert!(matches!(err, ShellError::MissingEntryScript(_)));
        assert!(supervisor.current().is_none());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::path::Path;

        /// `/bin/sh` plays the interpreter and the "entry script" is shell
        fn fake_backend(dir: &Path, body: &str) -> LaunchSpec {
            let script = dir.join("web.py");
            std::fs::write(&script, format!("{}\n", body)).unwrap();
            LaunchSpec {
                executable: PathBuf::from("/bin/sh"),
                script,
                port: 18080,
            }
        }

        #[tokio::test]
        async fn crash_reports_stderr_and_code() {
            let dir = tempfile::tempdir().unwrap();
            let spec = fake_backend(
                dir.path(),
                "echo \"port=$FLASK_PORT enc=$PYTHONIOENCODING\"\necho 'ModuleNotFoundError: flask' >&2\nexit 3",
            );
            let supervisor = ProcessSupervisor::new();
            let log = EventLog::new();

            let watch = supervisor.spawn(&spec, &log).unwrap();
            let record = watch.wait().await;
            assert_eq!(record.code, Some(3));

            assert_eq!(watch.stdout().contents(), "port=18080 enc=utf-8\n");
            match watch.crash_error(&record) {
                Some(ShellError::BackendCrash { code, output }) => {
                    assert_eq!(code, 3);
                    assert_eq!(output, "ModuleNotFoundError: flask");
                }
                other => panic!("expected crash, got {:?}", other),
            }
            let text = log.render();
            assert!(text.contains("[backend] port=18080"));
            assert!(text.contains("[backend error] ModuleNotFoundError: flask"));
            assert!(text.contains("backend exited (code=3, signal=none)"));
        }

        #[tokio::test]
        async fn crash_without_stderr_falls_back_to_stdout_then_placeholder() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = ProcessSupervisor::new();
            let log = EventLog::new();

            let spec = fake_backend(dir.path(), "echo 'config missing'\nexit 2");
            let watch = supervisor.spawn(&spec, &log).unwrap();
            let record = watch.wait().await;
            let Some(ShellError::BackendCrash { output, .. }) = watch.crash_error(&record) else {
                panic!("expected crash");
            };
            assert_eq!(output, "config missing");

            let spec = fake_backend(dir.path(), "exit 1");
            let watch = supervisor.spawn(&spec, &log).unwrap();
            let record = watch.wait().await;
            let Some(ShellError::BackendCrash { output, .. }) = watch.crash_error(&record) else {
                panic!("expected crash");
            };
            assert_eq!(output, "unknown error");
        }

        #[tokio::test]
        async fn clean_exit_is_not_a_crash() {
            let dir = tempfile::tempdir().unwrap();
            let spec = fake_backend(dir.path(), "exit 0");
            let supervisor = ProcessSupervisor::new();
            let log = EventLog::new();

            let watch = supervisor.spawn(&spec, &log).unwrap();
            let record = watch.wait().await;
            assert!(watch.crash_error(&record).is_none());
        }

        #[tokio::test]
        async fn exited_backend_is_no_longer_current() {
            let dir = tempfile::tempdir().unwrap();
            let spec = fake_backend(dir.path(), "exit 5");
            let supervisor = ProcessSupervisor::new();
            let log = EventLog::new();

            let watch = supervisor.spawn(&spec, &log).unwrap();
            watch.wait().await;

            assert!(supervisor.current().is_none());
            // Nothing left to stop
            supervisor.terminate(&log);
            assert!(!log.render().contains("stopping backend..."));
        }

        #[tokio::test]
        async fn terminate_twice_kills_once() {
            let dir = tempfile::tempdir().unwrap();
            let spec = fake_backend(dir.path(), "sleep 30");
            let supervisor = ProcessSupervisor::new();
            let log = EventLog::new();

            let watch = supervisor.spawn(&spec, &log).unwrap();
            supervisor.terminate(&log);
            supervisor.terminate(&log);

            let record = tokio::time::timeout(Duration::from_secs(5), watch.wait())
                .await
                .expect("backend survived terminate");
            assert_eq!(record.signal, Some(libc::SIGTERM));
            assert!(watch.crash_error(&record).is_none());
            assert!(supervisor.current().is_none());

            let stops = log
                .snapshot()
                .iter()
                .filter(|event| event.message == "stopping backend...")
                .count();
            assert_eq!(stops, 1);
        }
    }
}
