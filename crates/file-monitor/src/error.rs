//! Error types for starting a monitor and loading its configuration

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons `FileMonitor::start` can fail
///
/// Any of these leaves the monitor fully stopped: watches registered before
/// the failure are rolled back.
#[derive(Debug, Error)]
pub enum StartError {
    /// The path does not exist
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The path exists but is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The directory cannot be read or watched by this process
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The platform's limit on concurrent watches was reached
    #[error("watch limit exceeded while watching {}", .0.display())]
    WatchLimitExceeded(PathBuf),

    /// `start` was called on a running monitor
    #[error("file monitor already started")]
    AlreadyStarted,

    /// The monitor's configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The native watch mechanism could not be initialized
    #[error("failed to initialize watch backend: {0}")]
    BackendInit(String),

    /// Any other native registration failure
    #[error("failed to watch {}: {message}", path.display())]
    Backend { path: PathBuf, message: String },

    /// The dispatcher thread could not be spawned
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] io::Error),
}

impl StartError {
    /// Classify an I/O error raised while validating or registering `path`
    pub(crate) fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::PathNotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Backend {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    /// Classify an error returned by a `notify` watcher for `path`
    pub(crate) fn from_notify(path: &Path, err: notify::Error) -> Self {
        match err.kind {
            notify::ErrorKind::PathNotFound => Self::PathNotFound(path.to_path_buf()),
            notify::ErrorKind::MaxFilesWatch => Self::WatchLimitExceeded(path.to_path_buf()),
            notify::ErrorKind::Io(io_err) => Self::from_io(path, io_err),
            other => Self::Backend {
                path: path.to_path_buf(),
                message: format!("{:?}", other),
            },
        }
    }

    /// The path the error refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::PathNotFound(path)
            | Self::NotADirectory(path)
            | Self::PermissionDenied(path)
            | Self::WatchLimitExceeded(path)
            | Self::Backend { path, .. } => Some(path),
            Self::AlreadyStarted | Self::Config(_) | Self::BackendInit(_) | Self::Spawn(_) => None,
        }
    }
}

/// Errors produced while loading a `MonitorConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid monitor config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let path = Path::new("/watched/dir");

        let err = StartError::from_io(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, StartError::PathNotFound(ref p) if p == path));

        let err = StartError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, StartError::PermissionDenied(_)));

        let err = StartError::from_io(path, io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(matches!(err, StartError::Backend { ref message, .. } if message.contains("boom")));
    }

    #[test]
    fn test_notify_errors_are_classified() {
        let path = Path::new("/watched/dir");

        let err = StartError::from_notify(path, notify::Error::new(notify::ErrorKind::MaxFilesWatch));
        assert!(matches!(err, StartError::WatchLimitExceeded(_)));

        let err = StartError::from_notify(path, notify::Error::path_not_found());
        assert!(matches!(err, StartError::PathNotFound(_)));

        let err = StartError::from_notify(
            path,
            notify::Error::io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert!(matches!(err, StartError::PermissionDenied(_)));

        let err = StartError::from_notify(path, notify::Error::generic("inotify broke"));
        assert_eq!(err.path(), Some(path));
    }
}
