//! inotify translation
//!
//! inotify watches are per directory, so recursion is done by the path table.
//! Renames arrive as `IN_MOVED_FROM`/`IN_MOVED_TO` halves linked by a cookie,
//! which notify exposes as the event tracker.

use super::{overflow_records, stat_is_dir, RawKind, RawRecord, Translate};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};

/// Translator for inotify events
#[derive(Debug, Default)]
pub struct Inotify;

impl Translate for Inotify {
    const NAME: &'static str = "inotify";
    const NATIVE_RECURSION: bool = false;
    const COOKIES: bool = true;

    fn translate(&mut self, event: Event, out: &mut Vec<RawRecord>) {
        // IN_Q_OVERFLOW
        if event.need_rescan() {
            overflow_records(&event, out);
            return;
        }

        let cookie = event.tracker();
        let Some(path) = event.paths.first().cloned() else {
            return;
        };

        let record = match event.kind {
            EventKind::Create(kind) => {
                RawRecord::new(RawKind::Added, path).with_dir(create_is_dir(kind))
            }
            // A watched directory's own IN_DELETE_SELF arrives as RemoveKind::File
            EventKind::Remove(kind) => {
                RawRecord::new(RawKind::Removed, path).with_dir(remove_is_dir(kind))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                RawRecord::new(RawKind::RenamedFrom, path).with_cookie(cookie)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let is_dir = stat_is_dir(&path);
                RawRecord::new(RawKind::RenamedTo, path)
                    .with_dir(is_dir)
                    .with_cookie(cookie)
            }
            // notify repeats a completed move as one two-path event after
            // delivering both halves
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return,
            // Rename without a direction: what is on disk decides
            EventKind::Modify(ModifyKind::Name(_)) => match stat_is_dir(&path) {
                Some(is_dir) => RawRecord::new(RawKind::RenamedTo, path).with_dir(Some(is_dir)),
                None => RawRecord::new(RawKind::RenamedFrom, path),
            },
            EventKind::Modify(_) => {
                let is_dir = stat_is_dir(&path);
                RawRecord::new(RawKind::Modified, path).with_dir(is_dir)
            }
            // Open/close/read notifications carry no change
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return,
        };

        out.push(record);
    }
}

fn create_is_dir(kind: CreateKind) -> Option<bool> {
    match kind {
        CreateKind::Folder => Some(true),
        CreateKind::File => Some(false),
        _ => None,
    }
}

fn remove_is_dir(kind: RemoveKind) -> Option<bool> {
    match kind {
        RemoveKind::Folder => Some(true),
        RemoveKind::File => Some(false),
        _ => None,
    }
}
