//! Resource waiting with exponential backoff.
//!
//! Provides a generic poll loop for waiting on cloud resources to reach a
//! target state (NAT gateway available or deleted, instance running or
//! terminated), with exponential backoff, jitter, and a bounded overall
//! timeout.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for resource waiting.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Wait for a resource to reach a target state.
///
/// `check` returns `Ok(true)` when the resource is ready, `Ok(false)` to keep
/// polling, or an error to abort the wait. Returns an error naming the
/// resource when the overall timeout elapses first.
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    check: F,
    resource_name: &str,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = std::time::Instant::now();
    let mut attempts = 0u32;

    let backoff = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    let mut delays = backoff.into_iter();

    loop {
        attempts += 1;

        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "Timeout waiting for {} after {:?} ({} attempts)",
                resource_name,
                config.timeout,
                attempts
            );
        }

        match check().await {
            Ok(true) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Resource check failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn returns_once_check_passes() {
        let calls = AtomicU32::new(0);
        let result = wait_for_resource(
            fast_config(),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n >= 2)
            },
            "test-resource",
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let config = WaitConfig {
            timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let result = wait_for_resource(config, || async { Ok(false) }, "stuck-resource").await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Timeout"), "unexpected error: {err}");
        assert!(err.contains("stuck-resource"));
    }

    #[tokio::test]
    async fn propagates_check_errors() {
        let result = wait_for_resource(
            fast_config(),
            || async { anyhow::bail!("boom") },
            "broken-resource",
        )
        .await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }
}
