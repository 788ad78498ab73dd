//! One-shot readiness signal of a session.

use std::time::Duration;
use tokio::sync::oneshot;

/// What a session reports when it becomes ready: `Ok` when the mount is
/// live, `Err` with the terminal mount error otherwise.
pub type MountOutcome = Result<(), String>;

/// Result of waiting on a `ReadySignal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed(String),
    TimedOut,
}

/// Sending half, owned by the session server.
///
/// Dropping it without notifying reports a mount error to the waiter.
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: oneshot::Sender<MountOutcome>,
}

impl ReadyNotifier {
    pub fn notify(self, outcome: MountOutcome) {
        // Waiter may have timed out and gone away.
        let _ = self.tx.send(outcome);
    }
}

/// Receiving half, awaited by Mount.
#[derive(Debug)]
pub struct ReadySignal {
    rx: oneshot::Receiver<MountOutcome>,
}

impl ReadySignal {
    pub fn channel() -> (ReadyNotifier, ReadySignal) {
        let (tx, rx) = oneshot::channel();
        (ReadyNotifier { tx }, ReadySignal { rx })
    }

    /// Wait for the session to report, at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Readiness {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(Ok(()))) => Readiness::Ready,
            Ok(Ok(Err(mount_error))) => Readiness::Failed(mount_error),
            Ok(Err(_)) => Readiness::Failed("session closed before reporting ready".to_string()),
            Err(_) => Readiness::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready() {
        let (notifier, signal) = ReadySignal::channel();
        notifier.notify(Ok(()));
        assert_eq!(signal.wait(Duration::from_secs(1)).await, Readiness::Ready);
    }

    #[tokio::test]
    async fn test_ready_with_mount_error() {
        let (notifier, signal) = ReadySignal::channel();
        notifier.notify(Err("fusermount: permission denied".into()));
        assert_eq!(
            signal.wait(Duration::from_secs(1)).await,
            Readiness::Failed("fusermount: permission denied".into())
        );
    }

    #[tokio::test]
    async fn test_dropped_notifier_is_mount_error() {
        let (notifier, signal) = ReadySignal::channel();
        drop(notifier);
        assert!(matches!(
            signal.wait(Duration::from_secs(1)).await,
            Readiness::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_silent_session_times_out() {
        let (_notifier, signal) = ReadySignal::channel();
        assert_eq!(
            signal.wait(Duration::from_millis(20)).await,
            Readiness::TimedOut
        );
    }
}
