//! Polling translation
//!
//! The poll watcher diffs directory snapshots, so it never overflows and
//! never reports renames; moves show up as a removal plus a creation and are
//! paired by the time window.

use super::{stat_is_dir, RawKind, RawRecord, Translate};
use notify::{Event, EventKind};

/// Translator for `notify::PollWatcher`
#[derive(Debug, Default)]
pub struct Polling;

impl Translate for Polling {
    const NAME: &'static str = "poll";
    const NATIVE_RECURSION: bool = true;
    const COOKIES: bool = false;

    fn translate(&mut self, event: Event, out: &mut Vec<RawRecord>) {
        for path in event.paths {
            let record = match event.kind {
                EventKind::Create(_) => {
                    let is_dir = stat_is_dir(&path);
                    RawRecord::new(RawKind::Added, path).with_dir(is_dir)
                }
                EventKind::Remove(_) => RawRecord::new(RawKind::Removed, path),
                EventKind::Modify(_) => {
                    let is_dir = stat_is_dir(&path);
                    RawRecord::new(RawKind::Modified, path).with_dir(is_dir)
                }
                EventKind::Access(_) | EventKind::Any | EventKind::Other => continue,
            };
            out.push(record);
        }
    }
}
