use crate::event_log::EventLog;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const ENTRY_SCRIPT: &str = "web.py";

#[cfg(windows)]
const EMBEDDED_PYTHON: &[&str] = &["python", "python.exe"];
#[cfg(not(windows))]
const EMBEDDED_PYTHON: &[&str] = &["python", "bin", "python3"];

#[cfg(windows)]
const VENV_PYTHON: &[&str] = &["venv", "Scripts", "python.exe"];
#[cfg(not(windows))]
const VENV_PYTHON: &[&str] = &["venv", "bin", "python"];

#[cfg(windows)]
const SYSTEM_PYTHON: &str = "python";
#[cfg(not(windows))]
const SYSTEM_PYTHON: &str = "python3";

/// Where the interpreter was found. Picked once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentLayout {
    Packaged,
    DevelopmentVenv,
    SystemInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub layout: DeploymentLayout,
    pub path: PathBuf,
}

/// Resolves the backend interpreter and `web.py` for the current install.
///
/// In a packaged build both live under the bundle's resource directory;
/// in development they come from the project checkout.
#[derive(Debug, Clone)]
pub struct Locator {
    packaged: bool,
    resource_dir: PathBuf,
    project_root: PathBuf,
    system_python: PathBuf,
}

impl Locator {
    pub fn new(packaged: bool, resource_dir: PathBuf, project_root: PathBuf) -> Self {
        Self {
            packaged,
            resource_dir,
            project_root,
            system_python: PathBuf::from(SYSTEM_PYTHON),
        }
    }

    /// Replace the last-resort interpreter command (`python3` by default)
    pub fn with_system_python(mut self, command: impl Into<PathBuf>) -> Self {
        self.system_python = command.into();
        self
    }

    pub fn is_packaged(&self) -> bool {
        self.packaged
    }

    /// Embedded interpreter, then the venv, then whatever `python3` the
    /// system has. The last step is not checked here; a missing system
    /// interpreter surfaces when the backend is spawned.
    pub fn resolve_executable(&self, log: &EventLog) -> ResolvedExecutable {
        if self.packaged {
            let embedded = join_all(&self.resource_dir, EMBEDDED_PYTHON);
            log.record(format!("checking embedded python: {}", embedded.display()));
            if embedded.exists() {
                log.record("found embedded python");
                return ResolvedExecutable {
                    layout: DeploymentLayout::Packaged,
                    path: embedded,
                };
            }
            log.record("embedded python missing");
        }

        let venv = join_all(&self.project_root, VENV_PYTHON);
        log.record(format!("checking venv python: {}", venv.display()));
        if venv.exists() {
            log.record("using venv python");
            return ResolvedExecutable {
                layout: DeploymentLayout::DevelopmentVenv,
                path: venv,
            };
        }

        log.record(format!("using system python: {}", self.system_python.display()));
        ResolvedExecutable {
            layout: DeploymentLayout::SystemInstalled,
            path: self.system_python.clone(),
        }
    }

    pub fn resolve_entry_script(&self) -> PathBuf {
        if self.packaged {
            self.resource_dir.join("app").join(ENTRY_SCRIPT)
        } else {
            self.project_root.join(ENTRY_SCRIPT)
        }
    }
}

fn join_all(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Whether `path` names something that can be launched. Bare command names
/// (no directory part) are looked up on `PATH`.
pub fn executable_exists(path: &Path) -> bool {
    let is_bare = path.parent().map_or(true, |parent| parent.as_os_str().is_empty());
    if !is_bare {
        return path.exists();
    }
    which::which(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn packaged_prefers_embedded_python() {
        let resources = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        touch(&join_all(resources.path(), EMBEDDED_PYTHON));
        touch(&join_all(project.path(), VENV_PYTHON));

        let locator = Locator::new(true, resources.path().into(), project.path().into());
        let log = EventLog::new();
        let resolved = locator.resolve_executable(&log);

        assert_eq!(resolved.layout, DeploymentLayout::Packaged);
        assert_eq!(resolved.path, join_all(resources.path(), EMBEDDED_PYTHON));
        assert!(log.render().contains("found embedded python"));
    }

    #[test]
    fn packaged_without_embedded_falls_back_to_venv() {
        let resources = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        touch(&join_all(project.path(), VENV_PYTHON));

        let locator = Locator::new(true, resources.path().into(), project.path().into());
        let log = EventLog::new();
        let resolved = locator.resolve_executable(&log);

        assert_eq!(resolved.layout, DeploymentLayout::DevelopmentVenv);
        assert!(log.render().contains("embedded python missing"));
    }

    #[test]
    fn development_never_checks_embedded() {
        let resources = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        touch(&join_all(resources.path(), EMBEDDED_PYTHON));

        let locator = Locator::new(false, resources.path().into(), project.path().into());
        let log = EventLog::new();
        let resolved = locator.resolve_executable(&log);

        assert_eq!(resolved.layout, DeploymentLayout::SystemInstalled);
        assert_eq!(resolved.path, PathBuf::from(SYSTEM_PYTHON));
        assert!(!log.render().contains("embedded"));
    }

    #[test]
    fn system_fallback_can_be_overridden() {
        let project = tempfile::tempdir().unwrap();
        let locator = Locator::new(false, "/res".into(), project.path().into())
            .with_system_python("python3.11");
        let resolved = locator.resolve_executable(&EventLog::new());
        assert_eq!(resolved.layout, DeploymentLayout::SystemInstalled);
        assert_eq!(resolved.path, PathBuf::from("python3.11"));
    }

    #[test]
    fn entry_script_follows_packaging() {
        let locator = Locator::new(false, "/res".into(), "/src/sbss".into());
        assert_eq!(locator.resolve_entry_script(), PathBuf::from("/src/sbss/web.py"));

        let locator = Locator::new(true, "/res".into(), "/src/sbss".into());
        assert_eq!(
            locator.resolve_entry_script(),
            PathBuf::from("/res").join("app").join("web.py")
        );
    }

    #[test]
    fn absolute_paths_are_checked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("python");
        touch(&present);
        assert!(executable_exists(&present));
        assert!(!executable_exists(&dir.path().join("missing")));
    }

    #[test]
    fn bare_names_are_searched_on_path() {
        assert!(!executable_exists(Path::new("sbss-no-such-interpreter-7f3a")));
    }

    #[cfg(unix)]
    #[test]
    fn bare_shell_is_found_on_path() {
        assert!(executable_exists(Path::new("sh")));
    }
}
