use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One line of the startup trace
#[derive(Debug, Clone, Serialize)]
pub struct StartupEvent {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl StartupEvent {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Append-only startup/shutdown trace shared by every lifecycle step.
///
/// Cloning yields another handle to the same sequence, so stream readers
/// and the exit monitor can record into it from their own tasks. Every
/// recorded line is also forwarded to the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StartupEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: impl Into<String>) {
        self.record_at(Level::Info, message);
    }

    pub fn record_at(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Info => log::info!("{}", message),
            Level::Warn => log::warn!("{}", message),
            Level::Error => log::error!("{}", message),
        }
        self.events.lock().push(StartupEvent {
            timestamp: Local::now(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<StartupEvent> {
        self.events.lock().clone()
    }

    /// Newline-joined dump, the same text that goes to disk
    pub fn render(&self) -> String {
        self.events
            .lock()
            .iter()
            .map(StartupEvent::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Best-effort write of the whole trace, overwriting any previous run.
    /// Failures are ignored.
    pub fn flush(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if std::fs::write(path, self.render()).is_ok() {
            self.record(format!("log written: {}", path.display()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_keeps_insertion_order() {
        let log = EventLog::new();
        log.record("first");
        log.record_at(Level::Error, "second");

        let text = log.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn clones_share_the_same_sequence() {
        let log = EventLog::new();
        let other = log.clone();
        other.record("from another task");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn flush_overwrites_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("startup.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale contents from last run").unwrap();

        let log = EventLog::new();
        log.record("=== sbss starting ===");
        log.flush(&path);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("=== sbss starting ==="));
        assert!(!written.contains("stale"));
        // The write itself is recorded after the dump
        assert!(log.render().contains("log written:"));
    }

    #[test]
    fn flush_to_unwritable_path_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let log = EventLog::new();
        log.record("something");
        log.flush(&blocker.join("startup.log"));
        assert_eq!(log.len(), 1);
    }
}
