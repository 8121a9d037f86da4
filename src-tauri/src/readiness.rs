use crate::config::ShellConfig;
use crate::error::ShellError;
use std::time::{Duration, Instant};

/// Timing knobs for [`wait_until_ready`]
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    /// Give up once this much time has passed since the first attempt
    pub timeout: Duration,
    /// Pause between failed attempts
    pub interval: Duration,
    /// Upper bound for a single request
    pub probe_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ShellConfig::default())
    }
}

impl From<&ShellConfig> for ReadinessPolicy {
    fn from(config: &ShellConfig) -> Self {
        Self {
            timeout: config.ready_timeout,
            interval: config.ready_poll_interval,
            probe_timeout: config.ready_probe_timeout,
        }
    }
}

pub fn root_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/", port)
}

/// Poll `GET /` on the backend until anything answers.
///
/// The status code is not looked at: a 404 or 500 still means the HTTP
/// listener is up. Connection errors and per-request timeouts both just
/// trigger the next attempt. Returns the time it took.
pub async fn wait_until_ready(port: u16, policy: ReadinessPolicy) -> Result<Duration, ShellError> {
    let url = root_url(port);
    // A system proxy must not intercept loopback probes
    let client = reqwest::Client::builder().no_proxy().build()?;

    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed > policy.timeout {
            return Err(ShellError::Timeout { elapsed });
        }

        // Never let one hung request run past the deadline
        let remaining = policy.timeout - elapsed;
        let attempt_timeout = policy.probe_timeout.min(remaining).max(Duration::from_millis(1));
        match client.get(&url).timeout(attempt_timeout).send().await {
            Ok(response) => {
                log::debug!("[Readiness] {} answered {}", url, response.status());
                return Ok(started.elapsed());
            }
            Err(e) => {
                log::trace!("[Readiness] {} not ready: {}", url, e);
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}
