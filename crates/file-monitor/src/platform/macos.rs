//! FSEvents translation
//!
//! FSEvents streams are recursive and coalesce flags per path. A rename is
//! reported as one `Name(Any)` event per side with no cookie, so the direction
//! is recovered from whether the path still exists, and pairing falls back to
//! the time window.

use super::{overflow_records, stat_is_dir, RawKind, RawRecord, Translate};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};

/// Translator for FSEvents
#[derive(Debug, Default)]
pub struct FsEvents;

impl Translate for FsEvents {
    const NAME: &'static str = "fsevents";
    const NATIVE_RECURSION: bool = true;
    const COOKIES: bool = false;

    fn translate(&mut self, event: Event, out: &mut Vec<RawRecord>) {
        // kFSEventStreamEventFlagMustScanSubDirs and friends
        if event.need_rescan() {
            overflow_records(&event, out);
            return;
        }

        for path in event.paths {
            let record = match event.kind {
                EventKind::Create(kind) => {
                    let is_dir = match kind {
                        CreateKind::Folder => Some(true),
                        CreateKind::File => Some(false),
                        _ => stat_is_dir(&path),
                    };
                    RawRecord::new(RawKind::Added, path).with_dir(is_dir)
                }
                EventKind::Remove(kind) => {
                    let is_dir = match kind {
                        RemoveKind::Folder => Some(true),
                        RemoveKind::File => Some(false),
                        _ => None,
                    };
                    RawRecord::new(RawKind::Removed, path).with_dir(is_dir)
                }
                EventKind::Modify(ModifyKind::Name(_)) => match stat_is_dir(&path) {
                    Some(is_dir) => {
                        RawRecord::new(RawKind::RenamedTo, path).with_dir(Some(is_dir))
                    }
                    None => RawRecord::new(RawKind::RenamedFrom, path),
                },
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

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, Flag, RenameMode};
    use std::fs;
    use tempfile::TempDir;

    fn translate(event: Event) -> Vec<RawRecord> {
        let mut out = Vec::new();
        FsEvents.translate(event, &mut out);
        out
    }

    #[test]
    fn test_rename_direction_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let gone = temp_dir.path().join("old.txt");
        let present = temp_dir.path().join("new.txt");
        fs::write(&present, b"x").unwrap();

        let out = translate(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
                .add_path(gone.clone()),
        );
        assert_eq!(out[0].kind, RawKind::RenamedFrom);
        assert_eq!(out[0].cookie, None);

        let out = translate(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
                .add_path(present.clone()),
        );
        assert_eq!(out[0].kind, RawKind::RenamedTo);
        assert_eq!(out[0].is_dir, Some(false));
    }

    #[test]
    fn test_create_and_modify() {
        let out = translate(
            Event::new(EventKind::Create(CreateKind::Folder))
                .add_path("/w/sub".into()),
        );
        assert_eq!(out[0].kind, RawKind::Added);
        assert_eq!(out[0].is_dir, Some(true));

        let out = translate(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path("/w/x.txt".into()),
        );
        assert_eq!(out[0].kind, RawKind::Modified);
    }

    #[test]
    fn test_must_scan_subdirs() {
        let out = translate(
            Event::new(EventKind::Other)
                .set_flag(Flag::Rescan)
                .add_path("/w".into()),
        );
        assert_eq!(out, vec![RawRecord::new(RawKind::Unknown, "/w")]);
    }
}
