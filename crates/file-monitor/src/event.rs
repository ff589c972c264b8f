//! Events delivered to the monitor callback

use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Entry created (or moved in from outside the watched tree)
    Created,
    /// Entry deleted (or moved out of the watched tree)
    Deleted,
    /// Entry renamed within the watched tree
    Renamed,
    /// Entry contents or metadata changed
    Changed,
}

/// A normalized filesystem change
///
/// Paths are absolute, use the native separator, carry no trailing separator
/// and are expressed under the root path given to `start`.
///
/// A `Changed` event on a watched root directory is also how a native queue
/// overflow is reported: events under that root were dropped and the client
/// should re-scan it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMonitorEvent {
    Created { path: PathBuf, is_dir: bool },
    Deleted { path: PathBuf, is_dir: bool },
    Renamed { from: PathBuf, to: PathBuf, is_dir: bool },
    Changed { path: PathBuf, is_dir: bool },
}

impl FileMonitorEvent {
    /// Event kind
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Deleted { .. } => EventKind::Deleted,
            Self::Renamed { .. } => EventKind::Renamed,
            Self::Changed { .. } => EventKind::Changed,
        }
    }

    /// Whether the affected entry is a directory
    pub fn is_dir(&self) -> bool {
        match self {
            Self::Created { is_dir, .. }
            | Self::Deleted { is_dir, .. }
            | Self::Renamed { is_dir, .. }
            | Self::Changed { is_dir, .. } => *is_dir,
        }
    }

    /// Primary path (the original path for renames)
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path, .. } | Self::Deleted { path, .. } | Self::Changed { path, .. } => {
                path
            }
            Self::Renamed { from, .. } => from,
        }
    }

    /// New path, only present for renames
    pub fn path_modified(&self) -> Option<&Path> {
        match self {
            Self::Renamed { to, .. } => Some(to),
            _ => None,
        }
    }
}

impl fmt::Display for FileMonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.is_dir() { "dir" } else { "file" };
        match self {
            Self::Renamed { from, to, .. } => {
                write!(f, "renamed {} {} -> {}", tag, from.display(), to.display())
            }
            other => write!(
                f,
                "{} {} {}",
                format!("{:?}", other.kind()).to_lowercase(),
                tag,
                other.path().display()
            ),
        }
    }
}
