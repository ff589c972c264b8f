//! In-memory backend for unit tests

use crate::error::StartError;
use crate::platform::{Backend, RawRecord, WatchHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ScriptState {
    registered: BTreeMap<WatchHandle, PathBuf>,
    next_handle: u64,
    forgotten: usize,
    limit: Option<usize>,
    batches: VecDeque<Vec<RawRecord>>,
}

/// Backend that validates paths against the real disk but takes its events
/// from a script. Clones share state, so a test can keep one clone while the
/// monitor owns another.
#[derive(Clone)]
pub(crate) struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
    native_recursion: bool,
    cookies: bool,
}

impl ScriptedBackend {
    /// Per-directory watches with rename cookies, like inotify
    pub fn manual() -> Self {
        Self {
            state: Arc::default(),
            native_recursion: false,
            cookies: true,
        }
    }

    /// Recursive watches without cookies, like FSEvents
    pub fn native() -> Self {
        Self {
            state: Arc::default(),
            native_recursion: true,
            cookies: false,
        }
    }

    pub fn set_limit(&self, limit: usize) {
        self.state.lock().limit = Some(limit);
    }

    /// Queue one batch to be returned by a later `poll`
    pub fn push_batch(&self, batch: Vec<RawRecord>) {
        self.state.lock().batches.push_back(batch);
    }

    pub fn registered_count(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// Handles dropped through `forget` rather than `unregister`
    pub fn forgotten_count(&self) -> usize {
        self.state.lock().forgotten
    }

    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.state.lock().registered.values().cloned().collect()
    }
}

impl Backend for ScriptedBackend {
    fn register(&mut self, path: &Path, _recursive: bool) -> Result<WatchHandle, StartError> {
        let metadata = std::fs::metadata(path).map_err(|e| StartError::from_io(path, e))?;
        if !metadata.is_dir() {
            return Err(StartError::NotADirectory(path.to_path_buf()));
        }

        let mut state = self.state.lock();
        if state.limit.map_or(false, |limit| state.registered.len() >= limit) {
            return Err(StartError::WatchLimitExceeded(path.to_path_buf()));
        }

        state.next_handle += 1;
        let handle = WatchHandle(state.next_handle);
        state.registered.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn poll(&mut self, timeout: Duration) -> Vec<RawRecord> {
        if let Some(batch) = self.state.lock().batches.pop_front() {
            return batch;
        }
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Vec::new()
    }

    fn unregister(&mut self, handle: WatchHandle) {
        self.state.lock().registered.remove(&handle);
    }

    fn forget(&mut self, handle: WatchHandle) {
        let mut state = self.state.lock();
        if state.registered.remove(&handle).is_some() {
            state.forgotten += 1;
        }
    }

    fn natively_recursive(&self) -> bool {
        self.native_recursion
    }

    fn supports_cookies(&self) -> bool {
        self.cookies
    }
}
