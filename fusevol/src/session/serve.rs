//! Serve thread bound to a session's lifetime.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use fusevol_shared::errors::{FusevolError, FusevolResult};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::SessionServer;

/// How a serve loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The mount went away and the loop drained.
    Closed,
    Failed(String),
}

/// Owner of a running serve loop.
///
/// The loop runs on a dedicated thread (FUSE reads block). Its exit is
/// published on a watch channel so the driver can notice a session that
/// died without an Unmount.
pub struct ServeHandle {
    volume_id: String,
    mountpoint: PathBuf,
    exit: watch::Receiver<Option<SessionExit>>,
    thread: JoinHandle<()>,
}

impl ServeHandle {
    /// Start serving `server` with `handler` on a new thread.
    pub fn spawn<H: Send + 'static>(
        volume_id: &str,
        mountpoint: &Path,
        server: Box<dyn SessionServer<H>>,
        handler: H,
    ) -> FusevolResult<Self> {
        let (tx, rx) = watch::channel(None);
        let id = volume_id.to_string();
        let path = mountpoint.to_path_buf();

        let thread = std::thread::Builder::new()
            .name(format!("fusevol-serve-{}", short_id(volume_id)))
            .spawn(move || {
                let exit = match server.serve(handler) {
                    Ok(()) => {
                        debug!(volume_id = %id, mount_path = %path.display(), "Serve loop exited");
                        SessionExit::Closed
                    }
                    Err(e) => {
                        warn!(volume_id = %id, mount_path = %path.display(), error = %e, "Serve loop failed");
                        SessionExit::Failed(e.to_string())
                    }
                };
                let _ = tx.send(Some(exit));
            })
            .map_err(|e| FusevolError::Internal(format!("failed to spawn serve thread: {}", e)))?;

        Ok(Self {
            volume_id: volume_id.to_string(),
            mountpoint: mountpoint.to_path_buf(),
            exit: rx,
            thread,
        })
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Exit status, once the loop has ended.
    pub fn exit_status(&self) -> Option<SessionExit> {
        if let Some(exit) = self.exit.borrow().clone() {
            return Some(exit);
        }
        if self.thread.is_finished() {
            return Some(SessionExit::Failed("serve thread panicked".to_string()));
        }
        None
    }

    /// Wait up to `timeout` for the loop to end.
    ///
    /// `None` means it is still running.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<SessionExit> {
        let mut rx = self.exit.clone();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(Option::is_some).await.map(|exit| (*exit).clone())
        })
        .await;

        match waited {
            Ok(Ok(exit)) => exit,
            // Sender dropped without publishing: the thread panicked.
            Ok(Err(_)) => Some(SessionExit::Failed("serve thread panicked".to_string())),
            Err(_) => None,
        }
    }
}

impl std::fmt::Debug for ServeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeHandle")
            .field("volume_id", &self.volume_id)
            .field("mountpoint", &self.mountpoint)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn short_id(volume_id: &str) -> &str {
    volume_id.get(..8).unwrap_or(volume_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ScriptedServer {
        release: mpsc::Receiver<FusevolResult<()>>,
    }

    impl SessionServer<()> for ScriptedServer {
        fn serve(self: Box<Self>, _handler: ()) -> FusevolResult<()> {
            self.release
                .recv()
                .unwrap_or_else(|_| Err(FusevolError::Internal("released".into())))
        }
    }

    fn spawn_scripted() -> (ServeHandle, mpsc::Sender<FusevolResult<()>>) {
        let (tx, rx) = mpsc::channel();
        let handle = ServeHandle::spawn(
            "0123456789abcdef",
            Path::new("/mnt/a"),
            Box::new(ScriptedServer { release: rx }),
            (),
        )
        .unwrap();
        (handle, tx)
    }

    #[tokio::test]
    async fn test_clean_exit_is_observed() {
        let (handle, release) = spawn_scripted();
        assert!(handle.is_alive());
        assert_eq!(handle.exit_status(), None);

        release.send(Ok(())).unwrap();

        assert_eq!(
            handle.wait_exit(Duration::from_secs(5)).await,
            Some(SessionExit::Closed)
        );
        assert_eq!(handle.exit_status(), Some(SessionExit::Closed));
    }

    #[tokio::test]
    async fn test_failed_exit_carries_error() {
        let (handle, release) = spawn_scripted();

        release
            .send(Err(FusevolError::Internal("channel closed".into())))
            .unwrap();

        match handle.wait_exit(Duration::from_secs(5)).await {
            Some(SessionExit::Failed(msg)) => assert!(msg.contains("channel closed")),
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_exit_times_out_while_serving() {
        let (handle, release) = spawn_scripted();

        assert_eq!(handle.wait_exit(Duration::from_millis(20)).await, None);

        release.send(Ok(())).unwrap();
        assert!(handle.wait_exit(Duration::from_secs(5)).await.is_some());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("v1"), "v1");
    }
}
