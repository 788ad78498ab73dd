//! FUSE session backend.
//!
//! Uses fuse-backend-rs sessions mounted through fusermount3. Sessions are
//! tracked by mount point so `terminate` can unmount them from any thread.

use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::{FuseChannel, FuseSession};
use fusevol_shared::constants::session::FUSE_SUBTYPE;
use fusevol_shared::errors::{FusevolError, FusevolResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{MountOption, ReadyNotifier, ReadySignal, Session, SessionBackend, SessionServer};

/// Identifies one establish call, so a finished serve loop only releases
/// the session it was serving.
type SessionToken = u64;

/// Live sessions by mount point. At most one session per mount point.
struct SessionTable<S> {
    entries: HashMap<PathBuf, (SessionToken, S)>,
    next_token: SessionToken,
}

impl<S> SessionTable<S> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_token: 1,
        }
    }

    fn contains(&self, mountpoint: &Path) -> bool {
        self.entries.contains_key(mountpoint)
    }

    fn get(&self, mountpoint: &Path, token: SessionToken) -> Option<&S> {
        match self.entries.get(mountpoint) {
            Some((owner, session)) if *owner == token => Some(session),
            _ => None,
        }
    }

    /// Track `session` at `mountpoint`. Hands the session back if the mount
    /// point is already taken.
    fn insert(&mut self, mountpoint: &Path, session: S) -> Result<SessionToken, S> {
        if self.contains(mountpoint) {
            return Err(session);
        }
        let token = self.next_token;
        self.next_token += 1;
        self.entries
            .insert(mountpoint.to_path_buf(), (token, session));
        Ok(token)
    }

    /// Put back an entry taken out by `take`.
    fn restore(&mut self, mountpoint: &Path, token: SessionToken, session: S) {
        self.entries
            .insert(mountpoint.to_path_buf(), (token, session));
    }

    fn take(&mut self, mountpoint: &Path) -> Option<(SessionToken, S)> {
        self.entries.remove(mountpoint)
    }

    /// Remove the entry at `mountpoint` only if it still belongs to `token`.
    fn release(&mut self, mountpoint: &Path, token: SessionToken) -> Option<S> {
        self.get(mountpoint, token)?;
        self.entries.remove(mountpoint).map(|(_, session)| session)
    }
}

type SharedSessions = Arc<Mutex<SessionTable<FuseSession>>>;

/// FUSE backend serving any fuse-backend-rs filesystem `F`.
pub struct FuseBackend<F> {
    sessions: SharedSessions,
    _fs: PhantomData<fn() -> F>,
}

impl<F> FuseBackend<F> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(SessionTable::new())),
            _fs: PhantomData,
        }
    }
}

impl<F> Default for FuseBackend<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> SessionBackend for FuseBackend<F>
where
    F: FileSystem + Send + Sync + 'static,
{
    type Handler = Arc<F>;

    fn establish(
        &self,
        mountpoint: &Path,
        options: &[MountOption],
    ) -> FusevolResult<Session<Self::Handler>> {
        if self.sessions.lock().contains(mountpoint) {
            return Err(mountpoint_busy(mountpoint));
        }

        let opts = FuseMountOptions::from_options(options);

        ensure_mountpoint_exists(mountpoint)?;
        let mut session = create_fuse_session(mountpoint, &opts)?;
        mount_session(&mut session, mountpoint)?;

        debug!(
            mount_path = %mountpoint.display(),
            fs_name = %opts.fs_name,
            read_only = opts.read_only,
            "FUSE session established"
        );

        // Lost a race for the same mount point: dropping our session unmounts it.
        let token = self
            .sessions
            .lock()
            .insert(mountpoint, session)
            .map_err(|_| mountpoint_busy(mountpoint))?;

        let (notifier, ready) = ReadySignal::channel();
        let server = FuseSessionServer {
            mountpoint: mountpoint.to_path_buf(),
            token,
            sessions: Arc::clone(&self.sessions),
            notifier,
        };

        Ok(Session {
            mountpoint: mountpoint.to_path_buf(),
            ready,
            server: Box::new(server),
        })
    }

    fn terminate(&self, mountpoint: &Path) -> FusevolResult<()> {
        let tracked = self.sessions.lock().take(mountpoint);

        let Some((token, mut session)) = tracked else {
            return unmount_untracked(mountpoint);
        };

        let _ = session.wake();
        if let Err(e) = session.umount() {
            let err = FusevolError::SessionTerminate(format!(
                "Failed to unmount FUSE session {}: {}",
                mountpoint.display(),
                e
            ));
            self.sessions.lock().restore(mountpoint, token, session);
            return Err(err);
        }

        debug!(mount_path = %mountpoint.display(), "FUSE session unmounted");
        Ok(())
    }

    fn is_mounted(&self, mountpoint: &Path) -> FusevolResult<bool> {
        if self.sessions.lock().contains(mountpoint) {
            return Ok(true);
        }
        let mountinfo = std::fs::read_to_string("/proc/self/mountinfo").map_err(|e| {
            FusevolError::Internal(format!("Failed to read /proc/self/mountinfo: {}", e))
        })?;
        Ok(mountinfo_lists(&mountinfo, mountpoint))
    }
}

/// Serving half handed to the driver's serve thread.
struct FuseSessionServer {
    mountpoint: PathBuf,
    token: SessionToken,
    sessions: SharedSessions,
    notifier: ReadyNotifier,
}

impl<F> SessionServer<Arc<F>> for FuseSessionServer
where
    F: FileSystem + Send + Sync + 'static,
{
    fn serve(self: Box<Self>, fs: Arc<F>) -> FusevolResult<()> {
        let FuseSessionServer {
            mountpoint,
            token,
            sessions,
            notifier,
        } = *self;

        let channel = match open_channel(&sessions, &mountpoint, token) {
            Ok(channel) => channel,
            Err(e) => {
                notifier.notify(Err(e.to_string()));
                // Dropping the session unmounts it.
                drop(sessions.lock().release(&mountpoint, token));
                return Err(e);
            }
        };

        notifier.notify(Ok(()));
        serve_requests(fs, channel);

        // Mount vanished underneath us (external umount): release our record,
        // never a newer session mounted at the same path.
        if let Some(session) = sessions.lock().release(&mountpoint, token) {
            debug!(mount_path = %mountpoint.display(), "Releasing FUSE session after serve loop exit");
            drop(session);
        }
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

struct FuseMountOptions {
    fs_name: String,
    subtype: String,
    read_only: bool,
}

impl FuseMountOptions {
    fn from_options(options: &[MountOption]) -> Self {
        let mut opts = Self {
            fs_name: FUSE_SUBTYPE.to_string(),
            subtype: FUSE_SUBTYPE.to_string(),
            read_only: false,
        };
        for option in options {
            match option {
                MountOption::FsName(name) => opts.fs_name = name.clone(),
                MountOption::Subtype(subtype) => opts.subtype = subtype.clone(),
                MountOption::ReadOnly => opts.read_only = true,
                MountOption::Custom(raw) => {
                    debug!(option = %raw, "Ignoring mount option not understood by FUSE backend")
                }
            }
        }
        opts
    }
}

fn mountpoint_busy(mountpoint: &Path) -> FusevolError {
    FusevolError::SessionEstablish(format!(
        "A FUSE session is already mounted at {}",
        mountpoint.display()
    ))
}

/// Whether `/proc/self/mountinfo` content lists `mountpoint` as a mount point.
fn mountinfo_lists(mountinfo: &str, mountpoint: &Path) -> bool {
    let wanted = mountpoint.to_string_lossy();
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .any(|field| unescape_mountinfo(field).as_str() == wanted.as_ref())
}

/// Undo the octal escapes (`\040` for space, etc.) used in mountinfo.
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(byte) = field
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
        {
            out.push(byte);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn ensure_mountpoint_exists(mountpoint: &Path) -> FusevolResult<()> {
    std::fs::create_dir_all(mountpoint).map_err(|e| {
        FusevolError::SessionEstablish(format!(
            "Failed to create mount point {}: {}",
            mountpoint.display(),
            e
        ))
    })
}

fn create_fuse_session(mountpoint: &Path, opts: &FuseMountOptions) -> FusevolResult<FuseSession> {
    FuseSession::new(mountpoint, &opts.fs_name, &opts.subtype, opts.read_only).map_err(|e| {
        FusevolError::SessionEstablish(format!(
            "Failed to create FUSE session for {}: {}",
            mountpoint.display(),
            e
        ))
    })
}

fn mount_session(session: &mut FuseSession, mountpoint: &Path) -> FusevolResult<()> {
    session.mount().map_err(|e| {
        FusevolError::SessionEstablish(format!(
            "Failed to mount FUSE filesystem at {}: {}",
            mountpoint.display(),
            e
        ))
    })
}

fn open_channel(
    sessions: &SharedSessions,
    mountpoint: &Path,
    token: SessionToken,
) -> FusevolResult<FuseChannel> {
    let sessions = sessions.lock();
    let session = sessions.get(mountpoint, token).ok_or_else(|| {
        FusevolError::SessionMount(format!(
            "FUSE session at {} was terminated before serving",
            mountpoint.display()
        ))
    })?;
    session.new_channel().map_err(|e| {
        FusevolError::SessionMount(format!("Failed to create FUSE channel: {}", e))
    })
}

fn serve_requests<F>(fs: Arc<F>, mut channel: FuseChannel)
where
    F: FileSystem + Send + Sync,
{
    let server = Server::new(fs);

    loop {
        match channel.get_request() {
            Ok(Some((reader, writer))) => {
                if let Err(e) = server.handle_message(reader, writer.into(), None, None) {
                    match e {
                        fuse_backend_rs::Error::EncodeMessage(ref io_err)
                            if is_io_channel_closed(io_err) =>
                        {
                            break;
                        }
                        _ => warn!("FUSE message handling error: {}", e),
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                if is_transport_channel_closed(&e) {
                    break;
                }
                error!("FUSE channel error: {}", e);
                break;
            }
        }
    }
}

fn is_io_channel_closed(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EBADF) | Some(libc::ENODEV))
}

fn is_transport_channel_closed(e: &fuse_backend_rs::transport::Error) -> bool {
    match e {
        fuse_backend_rs::transport::Error::IoError(io_err) => is_io_channel_closed(io_err),
        _ => false,
    }
}

/// Unmount a mount point this process does not track (e.g. left behind by
/// a previous driver process).
///
/// With CAP_SYS_ADMIN: lazy umount2(2). Otherwise: fusermount3 -u.
fn unmount_untracked(mountpoint: &Path) -> FusevolResult<()> {
    if has_cap_sys_admin() {
        debug!(mount_path = %mountpoint.display(), "Unmounting untracked session with umount2");
        return nix::mount::umount2(mountpoint, nix::mount::MntFlags::MNT_DETACH).map_err(|e| {
            FusevolError::SessionTerminate(format!(
                "Failed to unmount {}: {}",
                mountpoint.display(),
                e
            ))
        });
    }

    debug!(mount_path = %mountpoint.display(), "Unmounting untracked session with fusermount3");
    let status = std::process::Command::new("fusermount3")
        .arg("-u")
        .arg(mountpoint)
        .status()
        .map_err(|e| {
            FusevolError::SessionTerminate(format!("Failed to run fusermount3: {}", e))
        })?;

    if !status.success() {
        return Err(FusevolError::SessionTerminate(format!(
            "fusermount3 -u {} exited with {}",
            mountpoint.display(),
            status
        )));
    }
    Ok(())
}

fn has_cap_sys_admin() -> bool {
    caps::has_cap(
        None,
        caps::CapSet::Effective,
        caps::Capability::CAP_SYS_ADMIN,
    )
    .unwrap_or(false)
}
