//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Cooperative cancellation for long-running operations."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{DeployError, Result};

/// Cancellation flag with an optional deadline.
///
/// Cancelling never rolls anything back: the topology is left as it is.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    flag: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
            deadline: None,
        }
    }

    /// Same flag, additionally expiring `after` from now.
    pub fn with_timeout(&self, after: Duration) -> Self {
        let deadline = Instant::now() + after;
        Self {
            flag: self.flag.clone(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the flag is raised or the deadline passes.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        let raised = async move {
            let _ = rx.wait_for(|raised| *raised).await;
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = raised => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => raised.await,
        }
    }

    /// Drive `work` unless cancellation wins first.
    pub async fn guard<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DeployError::Cancelled),
            result = work => result,
        }
    }

    /// Sleep that aborts on cancellation.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }

    /// Raise the flag on ctrl-c. The listener lives as long as the runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling current operation");
                signal.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_sleep() {
        let signal = CancelSignal::new().with_timeout(Duration::from_secs(5));
        let err = signal.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_reaches_clones() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.cancel();
        assert!(matches!(task.await.unwrap(), Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_passes_through_results() {
        let signal = CancelSignal::new();
        assert_eq!(signal.guard(async { Ok(7) }).await.unwrap(), 7);
    }
}
