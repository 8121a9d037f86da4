//! Killing the backend together with everything it started.
//!
//! Flask's reloader and any helper processes the backend forks must go down
//! with it, so termination always targets the whole tree. The platform
//! split stays in this file.

use std::io;

/// Put a freshly built command in its own process group (Unix) or keep it
/// from opening a console window (Windows).
pub fn prepare(command: &mut tokio::process::Command) {
    #[cfg(unix)]
    {
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }
}

/// Ask the process group led by `pid` to terminate
#[cfg(unix)]
pub fn terminate_tree(pid: u32) -> io::Result<()> {
    let pgid = pid as libc::pid_t;
    if pgid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"));
    }
    // SAFETY: plain syscall, negative pid addresses the process group
    let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Force-kill `pid` and its children; Windows has no process-group signal
#[cfg(windows)]
pub fn terminate_tree(pid: u32) -> io::Result<()> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    let status = Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {}", status),
        ))
    }
}
