use crate::error::ShellError;
use crate::event_log::EventLog;
use tokio::net::TcpListener;

/// How many consecutive ports are tried before giving up
pub const PORT_SCAN_WINDOW: u16 = 10;

/// Find the first port in `[start_port, start_port + 10)` that can be bound
/// on loopback. The listener is dropped right away, so the port is not
/// reserved: another process may still grab it before the backend does.
pub async fn find_free_port(start_port: u16, log: &EventLog) -> Result<u16, ShellError> {
    let end = start_port.saturating_add(PORT_SCAN_WINDOW - 1);
    for port in start_port..=end {
        log.record(format!("checking port {}", port));
        if is_port_free(port).await {
            return Ok(port);
        }
    }
    Err(ShellError::NoFreePort {
        start: start_port,
        end,
    })
}

async fn is_port_free(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}
