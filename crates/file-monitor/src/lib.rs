//! Directory change monitoring
//!
//! This crate watches one or more directory trees and reports normalized,
//! platform-independent events through a single callback:
//! - Native backends (inotify, FSEvents, ReadDirectoryChangesW) plus a polling fallback
//! - Manual recursive tracking where the native mechanism is not recursive
//! - Best-effort pairing of delete/create sequences into renames
//! - One background dispatcher thread per monitor, restartable across start/stop
//!
//! ```no_run
//! use file_monitor::{FileMonitor, FileMonitorEvent};
//!
//! let mut monitor = FileMonitor::new();
//! monitor
//!     .start(["assets"], true, |event: FileMonitorEvent| {
//!         println!("{:?} {}", event.kind(), event.path().display());
//!     })
//!     .expect("failed to watch assets");
//! // ...
//! monitor.stop();
//! ```

pub mod config;
pub mod error;
pub mod event;

mod dispatcher;
mod monitor;
mod pairing;
mod path_table;
mod platform;

#[cfg(test)]
mod testing;

pub use config::{BackendKind, MonitorConfig};
pub use error::{ConfigError, StartError};
pub use event::{EventKind, FileMonitorEvent};
pub use monitor::FileMonitor;
