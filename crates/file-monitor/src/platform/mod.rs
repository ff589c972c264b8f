//! Platform-specific watch backends
//!
//! Provides a unified interface (`Backend`) over the native notification
//! mechanisms. Each mechanism has a `Translate` implementation that turns
//! `notify` events into `RawRecord`s:
//! - Linux/Android: inotify (`linux::Inotify`)
//! - macOS: FSEvents (`macos::FsEvents`)
//! - Windows: ReadDirectoryChangesW (`windows::ReadDirectoryChanges`)
//! - Everywhere: directory polling (`poll::Polling`)
//!
//! Translators are plain data transformations and compile on every target;
//! only the choice of native watcher is made per platform.

pub mod linux;
pub mod macos;
pub mod native;
pub mod poll;
pub mod windows;

use crate::config::{BackendKind, MonitorConfig};
use crate::error::StartError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use native::NotifyBackend;

/// Opaque handle for one native watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(pub(crate) u64);

/// Kind of a backend record, before rename pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Added,
    Removed,
    Modified,
    RenamedFrom,
    RenamedTo,
    /// Native queue overflow: something changed under the root, state unknown
    Unknown,
}

/// A backend record in platform-independent form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Path as reported by the native mechanism. Empty for an overflow the
    /// backend cannot attribute to a root.
    pub path: PathBuf,
    pub kind: RawKind,
    /// `None` when the native record does not say
    pub is_dir: Option<bool>,
    /// Native rename token linking `RenamedFrom` and `RenamedTo`
    pub cookie: Option<usize>,
}

impl RawRecord {
    pub fn new(kind: RawKind, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir: None,
            cookie: None,
        }
    }

    pub fn with_dir(mut self, is_dir: Option<bool>) -> Self {
        self.is_dir = is_dir;
        self
    }

    pub fn with_cookie(mut self, cookie: Option<usize>) -> Self {
        self.cookie = cookie;
        self
    }
}

/// Native watch mechanism
///
/// Owned by one `FileMonitor`; moved into its dispatcher thread while running.
pub trait Backend: Send {
    /// Start watching `path`. `recursive` is a hint honoured only by
    /// natively recursive backends.
    fn register(&mut self, path: &Path, recursive: bool) -> Result<WatchHandle, StartError>;

    /// Wait up to `timeout` for native events and return them. Errors raised
    /// by the native mechanism are logged, never returned.
    fn poll(&mut self, timeout: Duration) -> Vec<RawRecord>;

    /// Stop watching. Handles already retired by the OS are ignored.
    fn unregister(&mut self, handle: WatchHandle);

    /// Drop a handle whose native watch was handed out again under another
    /// path, leaving that watch in place
    fn forget(&mut self, handle: WatchHandle);

    /// Whether a single registration covers the whole subtree
    fn natively_recursive(&self) -> bool;

    /// Whether rename halves carry a linking cookie
    fn supports_cookies(&self) -> bool;
}

/// Conversion of `notify` events into raw records for one mechanism
pub trait Translate: Send + 'static {
    /// Mechanism name used in logs
    const NAME: &'static str;
    const NATIVE_RECURSION: bool;
    const COOKIES: bool;

    fn translate(&mut self, event: notify::Event, out: &mut Vec<RawRecord>);
}

/// Create the backend selected by `config`
pub fn create_backend(config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    match config.backend {
        BackendKind::Native => native_backend(config),
        BackendKind::Poll => poll_backend(config),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn native_backend(_config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    use notify::Watcher;

    let backend = NotifyBackend::new(
        |handler| notify::RecommendedWatcher::new(handler, notify::Config::default()),
        linux::Inotify,
    )?;
    Ok(Box::new(backend))
}

#[cfg(target_os = "macos")]
fn native_backend(_config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    use notify::Watcher;

    let backend = NotifyBackend::new(
        |handler| notify::RecommendedWatcher::new(handler, notify::Config::default()),
        macos::FsEvents,
    )?;
    Ok(Box::new(backend))
}

#[cfg(target_os = "windows")]
fn native_backend(_config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    use notify::Watcher;

    let backend = NotifyBackend::new(
        |handler| notify::RecommendedWatcher::new(handler, notify::Config::default()),
        windows::ReadDirectoryChanges,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "windows"
)))]
fn native_backend(config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    tracing::debug!("no native backend for this platform, falling back to polling");
    poll_backend(config)
}

fn poll_backend(config: &MonitorConfig) -> Result<Box<dyn Backend>, StartError> {
    use notify::Watcher;

    let interval = config.poll_interval();
    let backend = NotifyBackend::new(
        move |handler| {
            notify::PollWatcher::new(handler, notify::Config::default().with_poll_interval(interval))
        },
        poll::Polling,
    )?;
    Ok(Box::new(backend))
}

/// Push one `Unknown` record per path carried by an overflow event, or a
/// single unattributed one when the event carries none
pub(crate) fn overflow_records(event: &notify::Event, out: &mut Vec<RawRecord>) {
    if event.paths.is_empty() {
        out.push(RawRecord::new(RawKind::Unknown, PathBuf::new()));
    } else {
        out.extend(
            event
                .paths
                .iter()
                .map(|path| RawRecord::new(RawKind::Unknown, path.clone())),
        );
    }
}

/// Directory flag of a path that still exists, without following symlinks
pub(crate) fn stat_is_dir(path: &Path) -> Option<bool> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|metadata| metadata.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::Flag;
    use notify::{Event, EventKind};

    #[test]
    fn test_overflow_without_paths_is_unattributed() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let mut out = Vec::new();
        overflow_records(&event, &mut out);

        assert_eq!(out, vec![RawRecord::new(RawKind::Unknown, PathBuf::new())]);
    }

    #[test]
    fn test_overflow_with_paths() {
        let event = Event::new(EventKind::Other)
            .set_flag(Flag::Rescan)
            .add_path(PathBuf::from("/w"));
        let mut out = Vec::new();
        overflow_records(&event, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, PathBuf::from("/w"));
        assert_eq!(out[0].kind, RawKind::Unknown);
    }

    #[test]
    fn test_stat_is_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(stat_is_dir(temp_dir.path()), Some(true));
        assert_eq!(stat_is_dir(&file), Some(false));
        assert_eq!(stat_is_dir(&temp_dir.path().join("missing")), None);
    }
}
