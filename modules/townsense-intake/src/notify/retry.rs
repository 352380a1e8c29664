use std::future::Future;
use std::time::Duration;

use tracing::warn;

use townsense_common::NotifyConfig;

use super::backend::NotifyError;

/// Bounded retry with exponential backoff: attempt `n` failing waits
/// `base_delay * 2^(n-1)`, capped at `max_delay`, before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NotifyConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl RetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run
    /// out. `op` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, what: &str, mut op: F) -> Delivery
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), NotifyError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(()) => return Delivery::Delivered { attempts: attempt },
                Err(e) if attempt >= max_attempts || !e.is_transient() => {
                    warn!(what, attempts = attempt, error = %e, "Delivery gave up");
                    return Delivery::Failed {
                        attempts: attempt,
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(10), Duration::from_secs(8));
        assert_eq!(policy.delay_after(64), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let delivery = fast()
            .run("test", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(NotifyError::Transport("down".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            delivery,
            Delivery::Failed {
                attempts: 3,
                reason: "Transport error: down".into()
            }
        );
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let delivery = fast()
            .run("test", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(NotifyError::InvalidMessage("bad recipient".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            delivery,
            Delivery::Failed {
                attempts: 1,
                reason: "Invalid message: bad recipient".into()
            }
        );
    }

    #[tokio::test]
    async fn client_rejection_stops_but_server_error_retries() {
        let rejected = fast()
            .run("test", |_| async {
                Err(NotifyError::Rejected {
                    status: 404,
                    body: "no such hook".into(),
                })
            })
            .await;
        assert!(matches!(rejected, Delivery::Failed { attempts: 1, .. }));

        let overloaded = fast()
            .run("test", |_| async {
                Err(NotifyError::Rejected {
                    status: 503,
                    body: String::new(),
                })
            })
            .await;
        assert!(matches!(overloaded, Delivery::Failed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let delivery = fast()
            .run("test", |attempt| async move {
                if attempt < 2 {
                    Err(NotifyError::Transport("flaky".into()))
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(delivery, Delivery::Delivered { attempts: 2 });
    }
}
