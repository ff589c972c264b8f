//! ReadDirectoryChangesW translation
//!
//! Records carry no file type, so directories are detected on disk where
//! possible. Renames arrive as adjacent old-name/new-name actions without a
//! cookie.

use super::{overflow_records, stat_is_dir, RawKind, RawRecord, Translate};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// Translator for ReadDirectoryChangesW
#[derive(Debug, Default)]
pub struct ReadDirectoryChanges;

impl Translate for ReadDirectoryChanges {
    const NAME: &'static str = "read-directory-changes";
    const NATIVE_RECURSION: bool = true;
    const COOKIES: bool = false;

    fn translate(&mut self, event: Event, out: &mut Vec<RawRecord>) {
        if event.need_rescan() {
            overflow_records(&event, out);
            return;
        }

        let Some(path) = event.paths.first().cloned() else {
            return;
        };

        let record = match event.kind {
            EventKind::Create(_) => {
                let is_dir = stat_is_dir(&path);
                RawRecord::new(RawKind::Added, path).with_dir(is_dir)
            }
            EventKind::Remove(_) => RawRecord::new(RawKind::Removed, path),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                RawRecord::new(RawKind::RenamedFrom, path)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let is_dir = stat_is_dir(&path);
                RawRecord::new(RawKind::RenamedTo, path).with_dir(is_dir)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return,
            EventKind::Modify(ModifyKind::Name(_)) => match stat_is_dir(&path) {
                Some(is_dir) => RawRecord::new(RawKind::RenamedTo, path).with_dir(Some(is_dir)),
                None => RawRecord::new(RawKind::RenamedFrom, path),
            },
            EventKind::Modify(_) => match stat_is_dir(&path) {
                // A directory is reported modified whenever its listing
                // changes; the children carry the real events
                Some(true) => return,
                is_dir => RawRecord::new(RawKind::Modified, path).with_dir(is_dir),
            },
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return,
        };

        out.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn translate(event: Event) -> Vec<RawRecord> {
        let mut out = Vec::new();
        ReadDirectoryChanges.translate(event, &mut out);
        out
    }

    #[test]
    fn test_create_resolves_dir_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let sub = temp_dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let out = translate(Event::new(EventKind::Create(CreateKind::Any)).add_path(sub));
        assert_eq!(out[0].kind, RawKind::Added);
        assert_eq!(out[0].is_dir, Some(true));
    }

    #[test]
    fn test_remove_has_unknown_type() {
        let out = translate(
            Event::new(EventKind::Remove(RemoveKind::Any)).add_path("C:\\w\\x.txt".into()),
        );
        assert_eq!(out[0].kind, RawKind::Removed);
        assert_eq!(out[0].is_dir, None);
    }

    #[test]
    fn test_directory_modify_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let out = translate(
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path(temp_dir.path().to_path_buf()),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_rename_halves_without_cookie() {
        let out = translate(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path("C:\\w\\a".into()),
        );
        assert_eq!(out[0].kind, RawKind::RenamedFrom);
        assert_eq!(out[0].cookie, None);
    }
}
