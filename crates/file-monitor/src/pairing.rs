//! Rename pairing
//!
//! Turns a removal followed by a matching creation into a single rename.
//! Each removal waits as a pending candidate for up to the pairing window:
//! - A matching creation rewrites it into a rename in place
//! - Expiry turns it into a deletion
//! - A creation that matches nothing also does, unless the candidate carries
//!   a cookie: then only its own cookie or expiry resolves it
//!
//! Records are matched by native cookie when both halves carry one, and by
//! arrival time otherwise. With several candidates the most recent matching
//! one wins. None of this is guaranteed: a delete followed by an unrelated
//! create inside the window on a cookie-less backend looks like a rename.
//!
//! Output order equals input order. A pending candidate holds its queue slot,
//! so everything that arrives after it waits until it resolves.

use crate::event::FileMonitorEvent;
use crate::platform::RawKind;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A raw record after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Index of the owning watch root
    pub root: usize,
    pub path: PathBuf,
    pub kind: RawKind,
    pub is_dir: bool,
    /// False when `is_dir` is a guess
    pub dir_known: bool,
    pub cookie: Option<usize>,
}

#[derive(Debug)]
struct Pending {
    record: Record,
    since: Instant,
}

#[derive(Debug)]
enum Slot {
    Ready(FileMonitorEvent),
    Pending(Pending),
}

/// Ordered pairing queue
#[derive(Debug)]
pub struct RenamePairing {
    window: Duration,
    /// Match by cookie; set when the backend supplies cookies and the config allows it
    cookies: bool,
    coalesce_changes: bool,
    queue: VecDeque<Slot>,
}

impl RenamePairing {
    pub fn new(window: Duration, cookies: bool, coalesce_changes: bool) -> Self {
        Self {
            window,
            cookies,
            coalesce_changes,
            queue: VecDeque::new(),
        }
    }

    /// Feed one record received at `now`
    pub fn push(&mut self, record: Record, now: Instant) {
        match record.kind {
            RawKind::Removed | RawKind::RenamedFrom => {
                // With cookies, a plain removal is never half of a rename
                if self.cookies && record.cookie.is_none() {
                    self.queue.push_back(Slot::Ready(FileMonitorEvent::Deleted {
                        path: record.path,
                        is_dir: record.is_dir,
                    }));
                } else {
                    self.queue.push_back(Slot::Pending(Pending { record, since: now }));
                }
            }
            RawKind::Added | RawKind::RenamedTo => self.push_creation(record, now),
            RawKind::Modified | RawKind::Unknown => self.push_change(record),
        }
    }

    /// Turn candidates older than the window into deletions
    pub fn expire(&mut self, now: Instant) {
        let window = self.window;
        for slot in self.queue.iter_mut() {
            if let Slot::Pending(pending) = slot {
                if now.saturating_duration_since(pending.since) >= window {
                    *slot = Slot::Ready(deleted(&pending.record));
                }
            }
        }
    }

    /// Pop the events that no pending candidate is holding back
    pub fn drain_ready(&mut self) -> impl Iterator<Item = FileMonitorEvent> + '_ {
        std::iter::from_fn(move || match self.queue.front() {
            Some(Slot::Ready(_)) => match self.queue.pop_front() {
                Some(Slot::Ready(event)) => Some(event),
                _ => None,
            },
            _ => None,
        })
    }

    /// Earliest instant at which a pending candidate expires
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .iter()
            .filter_map(|slot| match slot {
                Slot::Pending(pending) => Some(pending.since + self.window),
                Slot::Ready(_) => None,
            })
            .min()
    }

    pub fn pending_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }

    /// Discard everything, delivered or not
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    fn push_creation(&mut self, record: Record, now: Instant) {
        let matched = self
            .queue
            .iter()
            .rposition(|slot| match slot {
                Slot::Pending(pending) => self.matches(pending, &record, now),
                Slot::Ready(_) => false,
            });

        match matched {
            Some(index) => {
                if let Slot::Pending(pending) = &self.queue[index] {
                    let is_dir = if record.dir_known || !pending.record.dir_known {
                        record.is_dir
                    } else {
                        pending.record.is_dir
                    };
                    let renamed = FileMonitorEvent::Renamed {
                        from: pending.record.path.clone(),
                        to: record.path,
                        is_dir,
                    };
                    self.queue[index] = Slot::Ready(renamed);
                }
            }
            None => {
                let cookies = self.cookies;
                for slot in self.queue.iter_mut() {
                    if let Slot::Pending(pending) = slot {
                        // A cookie half can only be resolved by its own cookie or by expiry
                        if cookies && pending.record.cookie.is_some() {
                            continue;
                        }
                        *slot = Slot::Ready(deleted(&pending.record));
                    }
                }
                self.queue.push_back(Slot::Ready(FileMonitorEvent::Created {
                    path: record.path,
                    is_dir: record.is_dir,
                }));
            }
        }
    }

    fn push_change(&mut self, record: Record) {
        if self.coalesce_changes {
            if let Some(Slot::Ready(FileMonitorEvent::Changed { path, .. })) = self.queue.back() {
                if *path == record.path {
                    return;
                }
            }
        }

        self.queue.push_back(Slot::Ready(FileMonitorEvent::Changed {
            path: record.path,
            is_dir: record.is_dir,
        }));
    }

    fn matches(&self, pending: &Pending, added: &Record, now: Instant) -> bool {
        let removed = &pending.record;
        if removed.root != added.root || removed.path == added.path {
            return false;
        }
        if removed.dir_known && added.dir_known && removed.is_dir != added.is_dir {
            return false;
        }

        match (self.cookies, removed.cookie, added.cookie) {
            (true, Some(a), Some(b)) => a == b,
            (true, Some(_), None) | (true, None, Some(_)) => false,
            _ => now.saturating_duration_since(pending.since) <= self.window,
        }
    }
}

fn deleted(record: &Record) -> FileMonitorEvent {
    FileMonitorEvent::Deleted {
        path: record.path.clone(),
        is_dir: record.is_dir,
    }
}
