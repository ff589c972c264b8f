//! `Backend` implementation on top of a `notify` watcher

use super::{Backend, RawRecord, Translate, WatchHandle};
use crate::error::StartError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::{RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Upper bound on notify events drained by one `poll` call
const MAX_EVENTS_PER_POLL: usize = 1024;

/// Forwards events from the notify thread into the backend's queue
pub struct ChannelHandler(Sender<notify::Result<notify::Event>>);

impl notify::EventHandler for ChannelHandler {
    fn handle_event(&mut self, event: notify::Result<notify::Event>) {
        // The receiver only disappears while the backend is being dropped
        let _ = self.0.send(event);
    }
}

/// Backend driving a `notify` watcher, with `T` translating its events
pub struct NotifyBackend<W, T> {
    watcher: W,
    rx: Receiver<notify::Result<notify::Event>>,
    translator: T,
    /// Live registrations
    watches: HashMap<WatchHandle, PathBuf>,
    next_handle: u64,
}

impl<W, T> NotifyBackend<W, T>
where
    W: Watcher + Send + 'static,
    T: Translate,
{
    /// Build the watcher with `make_watcher`, handing it the queue's sender
    pub fn new<F>(make_watcher: F, translator: T) -> Result<Self, StartError>
    where
        F: FnOnce(ChannelHandler) -> notify::Result<W>,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = make_watcher(ChannelHandler(tx))
            .map_err(|e| StartError::BackendInit(format!("{}: {}", T::NAME, e)))?;

        debug!("initialized {} backend", T::NAME);

        Ok(Self {
            watcher,
            rx,
            translator,
            watches: HashMap::new(),
            next_handle: 1,
        })
    }

    fn accept(&mut self, result: notify::Result<notify::Event>, out: &mut Vec<RawRecord>) {
        match result {
            Ok(event) => {
                trace!("{} event: {:?}", T::NAME, event);
                self.translator.translate(event, out);
            }
            Err(err) => warn!("{} backend error: {}", T::NAME, err),
        }
    }
}

impl<W, T> Backend for NotifyBackend<W, T>
where
    W: Watcher + Send + 'static,
    T: Translate,
{
    fn register(&mut self, path: &Path, recursive: bool) -> Result<WatchHandle, StartError> {
        let mode = if recursive && T::NATIVE_RECURSION {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        self.watcher
            .watch(path, mode)
            .map_err(|e| StartError::from_notify(path, e))?;

        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;
        self.watches.insert(handle, path.to_path_buf());

        debug!("{} watching {} ({:?})", T::NAME, path.display(), mode);
        Ok(handle)
    }

    fn poll(&mut self, timeout: Duration) -> Vec<RawRecord> {
        let mut out = Vec::new();

        match self.rx.recv_timeout(timeout) {
            Ok(result) => self.accept(result, &mut out),
            Err(RecvTimeoutError::Timeout) => return out,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("{} event queue disconnected", T::NAME);
                return out;
            }
        }

        // Take whatever else is already queued so one poll covers a burst
        for _ in 1..MAX_EVENTS_PER_POLL {
            match self.rx.try_recv() {
                Ok(result) => self.accept(result, &mut out),
                Err(_) => break,
            }
        }

        out
    }

    fn unregister(&mut self, handle: WatchHandle) {
        let Some(path) = self.watches.remove(&handle) else {
            return;
        };

        if let Err(e) = self.watcher.unwatch(&path) {
            debug!("{} watch on {} already retired: {}", T::NAME, path.display(), e);
        } else {
            debug!("{} stopped watching {}", T::NAME, path.display());
        }
    }

    fn forget(&mut self, handle: WatchHandle) {
        if let Some(path) = self.watches.remove(&handle) {
            trace!("{} watch on {} now answers to another path", T::NAME, path.display());
        }
    }

    fn natively_recursive(&self) -> bool {
        T::NATIVE_RECURSION
    }

    fn supports_cookies(&self) -> bool {
        T::COOKIES
    }
}
