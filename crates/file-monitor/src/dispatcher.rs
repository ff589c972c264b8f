//! Background dispatch loop
//!
//! One thread per monitor: poll the backend, normalize each record against
//! the path table, run it through rename pairing, and hand the resulting
//! events to the client callback in order.

use crate::config::MonitorConfig;
use crate::event::FileMonitorEvent;
use crate::pairing::{Record, RenamePairing};
use crate::path_table::PathTable;
use crate::platform::{stat_is_dir, Backend, RawKind, RawRecord};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Client handler, invoked on the dispatcher thread only
pub type Callback = Box<dyn FnMut(FileMonitorEvent) + Send + 'static>;

/// How long a path stays in the duplicate filters
const DUPLICATE_HORIZON: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    backend: Box<dyn Backend>,
    table: PathTable,
    pairing: RenamePairing,
    recent: RecentPaths,
    callback: Callback,
    poll_timeout: Duration,
    pairing_window: Duration,
    /// Watched directories renamed away, keyed by cookie, until the other
    /// half arrives
    moving: HashMap<usize, (PathBuf, Instant)>,
    stop: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        backend: Box<dyn Backend>,
        table: PathTable,
        callback: Callback,
        config: &MonitorConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let cookies = config.use_cookies && backend.supports_cookies();
        Self {
            pairing: RenamePairing::new(config.pairing_window(), cookies, config.coalesce_changes),
            backend,
            table,
            recent: RecentPaths::default(),
            callback,
            poll_timeout: config.poll_timeout(),
            pairing_window: config.pairing_window(),
            moving: HashMap::new(),
            stop,
        }
    }

    /// Run the loop on a dedicated thread until the stop flag is set
    ///
    /// The thread releases every watch before it exits.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("file-monitor".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!("dispatcher running");

        while !self.stop.load(Ordering::Acquire) {
            self.step();
        }

        debug!(
            "dispatcher exiting, {} pending rename candidate(s) dropped",
            self.pairing.pending_count()
        );
        self.pairing.clear();
        self.table.release_all(self.backend.as_mut());
    }

    /// One poll, normalize, pair, deliver iteration
    fn step(&mut self) {
        let timeout = self.next_timeout(Instant::now());
        let batch = self.backend.poll(timeout);

        let now = Instant::now();
        for raw in batch {
            self.ingest(raw, now);
        }
        self.settle_moves(now);
        self.pairing.expire(now);
        self.recent.prune(now);

        for event in self.pairing.drain_ready() {
            trace!("delivering {}", event);
            (self.callback)(event);
        }
    }

    /// Never sleep past the moment a pending rename must be resolved
    fn next_timeout(&self, now: Instant) -> Duration {
        match self.pairing.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(self.poll_timeout),
            None => self.poll_timeout,
        }
    }

    fn ingest(&mut self, mut raw: RawRecord, now: Instant) {
        trace!("raw record: {:?}", raw);

        // Queued before the watch was re-registered under the new name
        if let Some(moved) = self.recent.follow_move(&raw.path) {
            trace!("{} now at {}", raw.path.display(), moved.display());
            raw.path = moved;
        }

        if raw.kind == RawKind::Unknown {
            self.overflow(&raw.path, now);
            return;
        }

        let Some((root, path)) = self.table.localize(&raw.path) else {
            trace!("ignoring {} outside watched roots", raw.path.display());
            return;
        };

        match raw.kind {
            RawKind::Added | RawKind::RenamedTo => self.creation(raw, root, path, now),
            RawKind::Removed | RawKind::RenamedFrom => self.removal(raw, root, path, now),
            RawKind::Modified | RawKind::Unknown => {
                let is_dir = raw.is_dir.unwrap_or_else(|| self.table.is_known_dir(&path));
                self.pairing.push(
                    Record {
                        root,
                        path,
                        kind: RawKind::Modified,
                        is_dir,
                        dir_known: raw.is_dir.is_some(),
                        cookie: None,
                    },
                    now,
                );
            }
        }
    }

    fn creation(&mut self, raw: RawRecord, root: usize, path: PathBuf, now: Instant) {
        if raw.kind == RawKind::Added && self.recent.take_synthesized(&path) {
            trace!("{} already reported", path.display());
            return;
        }
        self.recent.forget_retired(&path);
        self.recent.forget_moved(&path);

        let moved_from = match raw.cookie {
            Some(cookie) if raw.kind == RawKind::RenamedTo => {
                self.moving.remove(&cookie).map(|(old, _)| old)
            }
            _ => None,
        };

        let dir_flag = raw.is_dir.or_else(|| stat_is_dir(&path));
        let is_dir = dir_flag.unwrap_or(false);

        self.pairing.push(
            Record {
                root,
                path: path.clone(),
                kind: raw.kind,
                is_dir,
                dir_known: dir_flag.is_some(),
                cookie: raw.cookie,
            },
            now,
        );

        if !is_dir {
            if let Some(old) = moved_from {
                self.retire(&old, now);
            }
            return;
        }

        // The watch is in place before the creation is delivered. A directory
        // that was just made may already have content nobody saw being created.
        let mut created = Vec::new();
        let synthesize = raw.kind == RawKind::Added;
        self.table.on_dir_added(
            self.backend.as_mut(),
            root,
            &path,
            synthesize.then_some(&mut created),
        );

        if let Some(old) = moved_from {
            if self.table.is_known_dir(&path) {
                // The native watches followed the directory and now report
                // under the new name
                if self.table.on_dir_moved(self.backend.as_mut(), &old) {
                    debug!("watches under {} moved to {}", old.display(), path.display());
                }
                self.recent.mark_retired(old.clone(), now);
                self.recent.mark_moved(old, path.clone(), now);
            } else {
                self.retire(&old, now);
            }
        }

        for (child, child_is_dir) in created {
            self.recent.mark_synthesized(child.clone(), now);
            self.pairing.push(
                Record {
                    root,
                    path: child,
                    kind: RawKind::Added,
                    is_dir: child_is_dir,
                    dir_known: true,
                    cookie: None,
                },
                now,
            );
        }
    }

    fn removal(&mut self, raw: RawRecord, root: usize, path: PathBuf, now: Instant) {
        self.recent.forget_synthesized(&path);

        let known_dir = self.table.is_known_dir(&path);
        if !known_dir && self.recent.was_retired(&path) {
            // The directory's own watch reporting what its parent already did,
            // or the other way round
            trace!("{} already retired", path.display());
            return;
        }
        if raw.kind == RawKind::RenamedFrom
            && raw.cookie.is_none()
            && self.recent.was_moved_to(&path)
        {
            trace!("{} reported its own move", path.display());
            return;
        }

        // A watched directory reports its own deletion without the directory
        // flag, so the table has the last word
        let is_dir = raw.is_dir == Some(true) || known_dir;
        let dir_known = raw.is_dir.is_some() || known_dir || self.table.tracks_all_dirs(root);

        if is_dir {
            match raw.cookie {
                Some(cookie)
                    if raw.kind == RawKind::RenamedFrom
                        && known_dir
                        && self.table.tracks_all_dirs(root) =>
                {
                    // Its watches keep reporting until the destination is known
                    self.moving.insert(cookie, (path.clone(), now));
                }
                _ => self.retire(&path, now),
            }
        }

        self.pairing.push(
            Record {
                root,
                path,
                kind: raw.kind,
                is_dir,
                dir_known,
                cookie: raw.cookie,
            },
            now,
        );
    }

    /// Unregister the watches under a directory that left the tree
    fn retire(&mut self, path: &Path, now: Instant) {
        if self.table.on_dir_removed(self.backend.as_mut(), path) {
            debug!("retired watches under {}", path.display());
            self.recent.mark_retired(path.to_path_buf(), now);
        }
    }

    /// Directories renamed out of the tree never see their other half
    fn settle_moves(&mut self, now: Instant) {
        let window = self.pairing_window;
        let expired: Vec<usize> = self
            .moving
            .iter()
            .filter(|(_, (_, since))| now.saturating_duration_since(*since) >= window)
            .map(|(cookie, _)| *cookie)
            .collect();

        for cookie in expired {
            if let Some((old, _)) = self.moving.remove(&cookie) {
                self.retire(&old, now);
            }
        }
    }

    /// Report dropped events as a change on each affected root
    fn overflow(&mut self, raw_path: &Path, now: Instant) {
        let affected: Vec<usize> = match self.table.localize(raw_path) {
            Some((root, _)) if !raw_path.as_os_str().is_empty() => vec![root],
            _ => (0..self.table.roots().len()).collect(),
        };

        for root in affected {
            let path = self.table.roots()[root].path.clone();
            warn!(
                "event queue overflow under {}, changes may have been lost",
                path.display()
            );
            self.table.rescan_root(self.backend.as_mut(), root);
            self.pairing.push(
                Record {
                    root,
                    path,
                    kind: RawKind::Unknown,
                    is_dir: true,
                    dir_known: true,
                    cookie: None,
                },
                now,
            );
        }
    }
}

/// Short-lived memory of paths whose next notification is a duplicate
#[derive(Debug, Default)]
struct RecentPaths {
    /// Entries reported from a directory scan rather than a native event
    synthesized: HashMap<PathBuf, Instant>,
    /// Directories whose watches were retired
    retired: HashMap<PathBuf, Instant>,
    /// Renamed directories, old path to new path
    moved: HashMap<PathBuf, (PathBuf, Instant)>,
}

impl RecentPaths {
    fn mark_synthesized(&mut self, path: PathBuf, now: Instant) {
        self.synthesized.insert(path, now);
    }

    fn take_synthesized(&mut self, path: &Path) -> bool {
        self.synthesized.remove(path).is_some()
    }

    fn forget_synthesized(&mut self, path: &Path) {
        self.synthesized.remove(path);
    }

    fn mark_retired(&mut self, path: PathBuf, now: Instant) {
        self.retired.insert(path, now);
    }

    fn was_retired(&self, path: &Path) -> bool {
        self.retired.contains_key(path)
    }

    fn forget_retired(&mut self, path: &Path) {
        self.retired.remove(path);
    }

    fn mark_moved(&mut self, from: PathBuf, to: PathBuf, now: Instant) {
        self.moved.insert(from, (to, now));
    }

    /// A new entry took the old name; its contents are its own
    fn forget_moved(&mut self, path: &Path) {
        self.moved.remove(path);
    }

    fn was_moved_to(&self, path: &Path) -> bool {
        self.moved.values().any(|(to, _)| to == path)
    }

    /// Where an entry below a renamed directory lives now
    fn follow_move(&self, path: &Path) -> Option<PathBuf> {
        self.moved.iter().find_map(|(from, (to, _))| {
            let rest = path.strip_prefix(from).ok()?;
            (!rest.as_os_str().is_empty()).then(|| to.join(rest))
        })
    }

    fn prune(&mut self, now: Instant) {
        let fresh = |at: &mut Instant| now.saturating_duration_since(*at) < DUPLICATE_HORIZON;
        self.synthesized.retain(|_, at| fresh(at));
        self.retired.retain(|_, at| fresh(at));
        self.moved.retain(|_, (_, at)| fresh(at));
    }
}
