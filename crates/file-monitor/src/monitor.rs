//! Public `FileMonitor` facade

use crate::config::MonitorConfig;
use crate::dispatcher::{Callback, Dispatcher};
use crate::error::StartError;
use crate::event::FileMonitorEvent;
use crate::path_table::PathTable;
use crate::platform::{self, Backend};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Watches directories and reports changes to a callback
///
/// Each monitor owns one background thread while started. `start` and `stop`
/// take `&mut self`, so they can never run concurrently; a monitor shared
/// between threads must be wrapped in the caller's own lock.
pub struct FileMonitor {
    config: MonitorConfig,
    running: Option<Running>,
}

/// State that exists only between `start` and `stop`
struct Running {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    roots: Vec<PathBuf>,
}

impl FileMonitor {
    /// Create a stopped monitor with the default configuration
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    /// Create a stopped monitor
    pub fn with_config(config: MonitorConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Normalized roots being watched; empty when stopped
    pub fn roots(&self) -> &[PathBuf] {
        self.running
            .as_ref()
            .map_or(&[][..], |running| running.roots.as_slice())
    }

    /// Start watching `paths`
    ///
    /// Every path must be an existing directory. When `recursive` is set,
    /// all present and future subdirectories are watched too; on platforms
    /// without native recursive watches this walks each tree before
    /// returning, which takes time proportional to its size.
    ///
    /// `callback` runs on the monitor's thread, one event at a time, in
    /// arrival order. It must not block indefinitely and must not stop the
    /// monitor that invokes it.
    ///
    /// Fails with `AlreadyStarted` if the monitor is running, and with
    /// `Config` if the configuration does not validate. Any other failure
    /// undoes every watch registered so far.
    pub fn start<I, P, F>(&mut self, paths: I, recursive: bool, callback: F) -> Result<(), StartError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: FnMut(FileMonitorEvent) + Send + 'static,
    {
        if self.running.is_some() {
            return Err(StartError::AlreadyStarted);
        }
        self.config.validate()?;

        let backend = platform::create_backend(&self.config)?;
        self.start_with_backend(backend, paths, recursive, Box::new(callback))
    }

    pub(crate) fn start_with_backend<I, P>(
        &mut self,
        mut backend: Box<dyn Backend>,
        paths: I,
        recursive: bool,
        callback: Callback,
    ) -> Result<(), StartError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if self.running.is_some() {
            return Err(StartError::AlreadyStarted);
        }
        self.config.validate()?;

        let mut table = PathTable::new(!backend.natively_recursive());
        for path in paths {
            if let Err(e) = table.add_root(backend.as_mut(), path.as_ref(), recursive) {
                table.release_all(backend.as_mut());
                return Err(e);
            }
        }

        let roots: Vec<PathBuf> = table.roots().iter().map(|root| root.path.clone()).collect();
        let subdirs = table.subdir_count();

        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::new(backend, table, callback, &self.config, Arc::clone(&stop));
        // A failed spawn drops the dispatcher, and with it every native watch
        let thread = dispatcher.spawn().map_err(StartError::Spawn)?;

        info!(
            "file monitor started: {} root(s), {} subdirector{}, recursive: {}",
            roots.len(),
            subdirs,
            if subdirs == 1 { "y" } else { "ies" },
            recursive
        );

        self.running = Some(Running { stop, thread, roots });
        Ok(())
    }

    /// Stop watching
    ///
    /// Idempotent. Returns once the dispatcher thread has exited, which
    /// takes at most one poll timeout plus the callback in progress. No
    /// callback runs after this returns, and the monitor can be started
    /// again.
    ///
    /// # Panics
    ///
    /// If called from the monitor's own callback, which would otherwise
    /// deadlock waiting for itself. The monitor is still stopped: the
    /// dispatcher exits and releases its watches once that callback returns.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        assert_ne!(
            thread::current().id(),
            running.thread.thread().id(),
            "FileMonitor::stop called from its own callback"
        );

        if running.thread.join().is_err() {
            warn!("file monitor thread panicked; its watches were dropped with it");
        }

        info!("file monitor stopped: {} root(s) released", running.roots.len());
    }
}

impl Default for FileMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
