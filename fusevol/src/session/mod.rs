//! Mount sessions.
//!
//! A session is a live OS-level mount plus the loop serving its file
//! requests. The lifecycle manager drives it through four primitives:
//!
//! ```text
//! establish(path, options) -> Session { ready, server }
//! ready.wait(timeout)      -> Ready | Failed(mount error) | TimedOut
//! server.serve(handler)    (blocking, on a ServeHandle thread)
//! terminate(path)
//! is_mounted(path)
//! ```

mod ready;
mod serve;

#[cfg(target_os = "linux")]
mod fuse;

pub use ready::{MountOutcome, Readiness, ReadyNotifier, ReadySignal};
pub use serve::{ServeHandle, SessionExit};

#[cfg(target_os = "linux")]
pub use fuse::FuseBackend;

use fusevol_shared::errors::FusevolResult;
use std::path::{Path, PathBuf};

/// Option applied when establishing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    /// Mount source name.
    FsName(String),
    /// Filesystem subtype.
    Subtype(String),
    ReadOnly,
    /// Backend-specific option, passed through verbatim.
    Custom(String),
}

/// Serving half of an established session.
pub trait SessionServer<H>: Send {
    /// Serve requests with `handler` until the session closes.
    ///
    /// Fires the session's ready signal exactly once. Returns when the mount
    /// goes away; a failure before readiness is reported through the ready
    /// signal as a mount error.
    fn serve(self: Box<Self>, handler: H) -> FusevolResult<()>;
}

/// An established, not yet serving, session.
pub struct Session<H> {
    pub mountpoint: PathBuf,
    pub ready: ReadySignal,
    pub server: Box<dyn SessionServer<H>>,
}

/// OS-level session primitives.
pub trait SessionBackend: Send + Sync {
    /// Filesystem handler type this backend can serve.
    type Handler: Send + 'static;

    /// Set up the mount at `mountpoint`. Nothing is served yet.
    fn establish(
        &self,
        mountpoint: &Path,
        options: &[MountOption],
    ) -> FusevolResult<Session<Self::Handler>>;

    /// Unmount `mountpoint`, which ends its serve loop.
    fn terminate(&self, mountpoint: &Path) -> FusevolResult<()>;

    /// Whether anything is mounted at `mountpoint` right now, including
    /// mounts left behind by another process.
    fn is_mounted(&self, mountpoint: &Path) -> FusevolResult<bool>;
}
