//! Watched roots and manually tracked subdirectories
//!
//! Backends without native recursion need one watch per directory. The table
//! owns those watches: it walks each recursive root at start, registers
//! directories discovered while running, and retires watches when their
//! directory goes away.

use crate::error::StartError;
use crate::platform::{Backend, WatchHandle};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A root passed to `start`
#[derive(Debug)]
pub struct WatchRoot {
    /// Absolute, lexically normalized path as the client named it
    pub path: PathBuf,
    /// Symlink-resolved form, for backends that report real paths
    canonical: PathBuf,
    pub recursive: bool,
    /// `None` once the root directory itself has disappeared
    handle: Option<WatchHandle>,
}

/// A subdirectory watched on behalf of a recursive root
#[derive(Debug)]
struct SubdirEntry {
    /// Index into `PathTable::roots`
    root: usize,
    handle: WatchHandle,
}

/// Roots and subdirectory watches of one monitor
#[derive(Debug)]
pub struct PathTable {
    roots: Vec<WatchRoot>,
    /// Keyed by absolute path; descendants of a directory sort directly after it
    subdirs: BTreeMap<PathBuf, SubdirEntry>,
    /// Whether recursion has to be done by hand
    manual_recursion: bool,
}

impl PathTable {
    pub fn new(manual_recursion: bool) -> Self {
        Self {
            roots: Vec::new(),
            subdirs: BTreeMap::new(),
            manual_recursion,
        }
    }

    pub fn roots(&self) -> &[WatchRoot] {
        &self.roots
    }

    pub fn subdir_count(&self) -> usize {
        self.subdirs.len()
    }

    /// Validate, register and (if needed) walk a new root
    ///
    /// On error the table may hold partial registrations; the caller rolls
    /// back with `release_all`.
    pub fn add_root(
        &mut self,
        backend: &mut dyn Backend,
        path: &Path,
        recursive: bool,
    ) -> Result<(), StartError> {
        let path = normalize_path(path).map_err(|e| StartError::from_io(path, e))?;

        if self.roots.iter().any(|root| root.path == path) {
            debug!("{} already watched", path.display());
            return Ok(());
        }

        validate_root(&path)?;
        let canonical = fs::canonicalize(&path).map_err(|e| StartError::from_io(&path, e))?;
        let handle = backend.register(&path, recursive)?;

        let index = self.roots.len();
        self.roots.push(WatchRoot {
            path: path.clone(),
            canonical,
            recursive,
            handle: Some(handle),
        });

        if recursive && self.manual_recursion {
            // Existing subtrees are covered before start returns
            self.register_tree(backend, index, &path, None)?;
            debug!(
                "watching {} recursively ({} subdirectories)",
                path.display(),
                self.subdirs.values().filter(|e| e.root == index).count()
            );
        }

        Ok(())
    }

    /// Map a backend-reported path onto the owning root
    ///
    /// Returns the root index and the path expressed under the root path the
    /// client supplied. Paths outside every root, and paths below the direct
    /// children of a non-recursive root, yield `None`.
    pub fn localize(&self, raw: &Path) -> Option<(usize, PathBuf)> {
        let mut best: Option<(usize, PathBuf, usize)> = None;

        for (index, root) in self.roots.iter().enumerate() {
            let relative = raw
                .strip_prefix(&root.path)
                .or_else(|_| raw.strip_prefix(&root.canonical));
            let Ok(relative) = relative else {
                continue;
            };

            let depth = root.path.components().count();
            if best.as_ref().map_or(true, |(_, _, d)| depth > *d) {
                let local = lexical_clean(&root.path.join(relative));
                best = Some((index, local, depth));
            }
        }

        let (index, local, _) = best?;
        let root = &self.roots[index];
        if !root.recursive {
            let depth = local
                .strip_prefix(&root.path)
                .map(|rel| rel.components().count())
                .unwrap_or(0);
            if depth > 1 {
                return None;
            }
        }

        Some((index, local))
    }

    /// Whether every directory under this root is tracked by the table
    pub fn tracks_all_dirs(&self, root: usize) -> bool {
        self.manual_recursion && self.roots.get(root).map_or(false, |r| r.recursive)
    }

    /// Whether `path` is a root or a tracked subdirectory
    pub fn is_known_dir(&self, path: &Path) -> bool {
        self.subdirs.contains_key(path) || self.roots.iter().any(|root| root.path == path)
    }

    /// Start watching a directory that appeared under `root`
    ///
    /// Must run before the creation is delivered. When `created` is given,
    /// entries already inside the new directory are appended to it so the
    /// caller can report files that raced the watch registration.
    pub fn on_dir_added(
        &mut self,
        backend: &mut dyn Backend,
        root: usize,
        path: &Path,
        created: Option<&mut Vec<(PathBuf, bool)>>,
    ) {
        if !self.tracks_all_dirs(root) || self.is_known_dir(path) {
            return;
        }

        let result = self
            .register_subdir(backend, root, path)
            .and_then(|_| self.register_tree(backend, root, path, created));
        if let Err(e) = result {
            warn!("incomplete watch of new directory {}: {}", path.display(), e);
        }
    }

    /// Retire the watches on `path` and everything below it
    ///
    /// Returns true if anything was being watched there.
    pub fn on_dir_removed(&mut self, backend: &mut dyn Backend, path: &Path) -> bool {
        self.retire(backend, path, true)
    }

    /// Drop the entries under a directory renamed within the tree, after the
    /// new location has been registered
    ///
    /// The native watches follow the directory, and registering the new path
    /// handed back the same ones, so the old handles are forgotten rather
    /// than unregistered.
    pub fn on_dir_moved(&mut self, backend: &mut dyn Backend, path: &Path) -> bool {
        self.retire(backend, path, false)
    }

    fn retire(&mut self, backend: &mut dyn Backend, path: &Path, unwatch: bool) -> bool {
        let doomed: Vec<PathBuf> = self
            .subdirs
            .range(path.to_path_buf()..)
            .take_while(|(dir, _)| dir.starts_with(path))
            .map(|(dir, _)| dir.clone())
            .collect();

        let mut retired = !doomed.is_empty();
        for dir in doomed {
            if let Some(entry) = self.subdirs.remove(&dir) {
                release(backend, entry.handle, unwatch);
            }
        }

        for root in self.roots.iter_mut().filter(|root| root.path.starts_with(path)) {
            if let Some(handle) = root.handle.take() {
                debug!("watched root {} went away", root.path.display());
                release(backend, handle, unwatch);
                retired = true;
            }
        }

        retired
    }

    /// Reconcile a root's subdirectory watches with the disk after events
    /// were lost
    pub fn rescan_root(&mut self, backend: &mut dyn Backend, root: usize) {
        if !self.tracks_all_dirs(root) {
            return;
        }

        let stale: Vec<PathBuf> = self
            .subdirs
            .iter()
            .filter(|(dir, entry)| entry.root == root && !dir.is_dir())
            .map(|(dir, _)| dir.clone())
            .collect();
        for dir in stale {
            self.on_dir_removed(backend, &dir);
        }

        let path = self.roots[root].path.clone();
        if let Err(e) = self.register_tree(backend, root, &path, None) {
            warn!("rescan of {} incomplete: {}", path.display(), e);
        }
    }

    /// Unregister every watch and forget all roots
    pub fn release_all(&mut self, backend: &mut dyn Backend) {
        for (_, entry) in std::mem::take(&mut self.subdirs) {
            backend.unregister(entry.handle);
        }
        for root in self.roots.drain(..) {
            if let Some(handle) = root.handle {
                backend.unregister(handle);
            }
        }
    }

    /// Depth-first walk below `dir`, registering every directory found
    fn register_tree(
        &mut self,
        backend: &mut dyn Backend,
        root: usize,
        dir: &Path,
        mut created: Option<&mut Vec<(PathBuf, bool)>>,
    ) -> Result<(), StartError> {
        for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            if is_dir {
                self.register_subdir(backend, root, entry.path())?;
            }
            if let Some(created) = created.as_deref_mut() {
                created.push((entry.path().to_path_buf(), is_dir));
            }
        }
        Ok(())
    }

    /// Register one subdirectory. Only the watch limit is fatal; a directory
    /// that vanished or cannot be read is skipped.
    fn register_subdir(
        &mut self,
        backend: &mut dyn Backend,
        root: usize,
        path: &Path,
    ) -> Result<(), StartError> {
        if self.is_known_dir(path) {
            return Ok(());
        }

        match backend.register(path, false) {
            Ok(handle) => {
                self.subdirs
                    .insert(path.to_path_buf(), SubdirEntry { root, handle });
                Ok(())
            }
            Err(e @ StartError::WatchLimitExceeded(_)) => Err(e),
            Err(e) => {
                debug!("not watching {}: {}", path.display(), e);
                Ok(())
            }
        }
    }
}

fn release(backend: &mut dyn Backend, handle: WatchHandle, unwatch: bool) {
    if unwatch {
        backend.unregister(handle);
    } else {
        backend.forget(handle);
    }
}

/// Check that `path` is an existing, readable directory
fn validate_root(path: &Path) -> Result<(), StartError> {
    let metadata = fs::metadata(path).map_err(|e| StartError::from_io(path, e))?;
    if !metadata.is_dir() {
        return Err(StartError::NotADirectory(path.to_path_buf()));
    }
    fs::read_dir(path).map_err(|e| StartError::from_io(path, e))?;
    Ok(())
}

/// Normalize a path for watching
///
/// - Makes it absolute against the current directory
/// - Resolves `.` and `..` lexically
/// - Drops any trailing separator
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "empty path"));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(lexical_clean(&absolute))
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b/c")).unwrap();
        fs::create_dir_all(temp_dir.path().join("d")).unwrap();
        fs::write(temp_dir.path().join("a/file.txt"), b"x").unwrap();
        temp_dir
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/w/./sub/../x/")).unwrap(),
            PathBuf::from("/w/x")
        );
        assert_eq!(normalize_path(Path::new("/w/..")).unwrap(), PathBuf::from("/"));
        assert!(normalize_path(Path::new("rel")).unwrap().is_absolute());
        assert!(normalize_path(Path::new("")).is_err());
    }

    #[test]
    fn test_recursive_walk_registers_every_subdir() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);

        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        assert_eq!(table.subdir_count(), 4);
        assert_eq!(backend.registered_count(), 5);
        assert!(table.is_known_dir(&temp_dir.path().join("a/b/c")));
        assert!(!table.is_known_dir(&temp_dir.path().join("a/file.txt")));
    }

    #[test]
    fn test_native_recursion_skips_walk() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::native();
        let mut table = PathTable::new(false);

        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        assert_eq!(table.subdir_count(), 0);
        assert_eq!(backend.registered_count(), 1);
    }

    #[test]
    fn test_root_validation() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);

        let err = table
            .add_root(&mut backend, &temp_dir.path().join("missing"), false)
            .unwrap_err();
        assert!(matches!(err, StartError::PathNotFound(_)));

        let err = table
            .add_root(&mut backend, &temp_dir.path().join("a/file.txt"), false)
            .unwrap_err();
        assert!(matches!(err, StartError::NotADirectory(_)));
        assert!(table.roots().is_empty());
    }

    #[test]
    fn test_watch_limit_during_walk_is_fatal() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        backend.set_limit(3);
        let mut table = PathTable::new(true);

        let err = table.add_root(&mut backend, temp_dir.path(), true).unwrap_err();
        assert!(matches!(err, StartError::WatchLimitExceeded(_)));

        table.release_all(&mut backend);
        assert_eq!(backend.registered_count(), 0);
    }

    #[test]
    fn test_removing_dir_retires_descendants() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);
        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        assert!(table.on_dir_removed(&mut backend, &temp_dir.path().join("a")));

        assert_eq!(table.subdir_count(), 1);
        assert!(table.is_known_dir(&temp_dir.path().join("d")));
        assert_eq!(backend.registered_count(), 2);
        assert!(!table.on_dir_removed(&mut backend, &temp_dir.path().join("a")));
    }

    #[test]
    fn test_moved_dir_forgets_old_handles() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);
        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        let old = temp_dir.path().join("a");
        let new = temp_dir.path().join("moved");
        fs::rename(&old, &new).unwrap();
        table.on_dir_added(&mut backend, 0, &new, None);

        assert!(table.on_dir_moved(&mut backend, &old));
        assert!(!table.is_known_dir(&old.join("b")));
        assert!(table.is_known_dir(&new.join("b/c")));
        assert_eq!(backend.forgotten_count(), 3);
        assert_eq!(backend.registered_count(), 5);
    }

    #[test]
    fn test_new_dir_reports_racing_entries() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);
        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        let fresh = temp_dir.path().join("fresh");
        fs::create_dir_all(fresh.join("inner")).unwrap();
        fs::write(fresh.join("y.txt"), b"y").unwrap();

        let mut created = Vec::new();
        table.on_dir_added(&mut backend, 0, &fresh, Some(&mut created));

        assert!(table.is_known_dir(&fresh));
        assert!(table.is_known_dir(&fresh.join("inner")));
        created.sort();
        assert_eq!(
            created,
            vec![(fresh.join("inner"), true), (fresh.join("y.txt"), false)]
        );
    }

    #[test]
    fn test_localize_respects_recursion() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);
        table.add_root(&mut backend, temp_dir.path(), false).unwrap();

        let root = temp_dir.path();
        assert_eq!(
            table.localize(&root.join("x.txt")),
            Some((0, root.join("x.txt")))
        );
        assert_eq!(table.localize(root), Some((0, root.to_path_buf())));
        assert_eq!(table.localize(&root.join("a/b/deep.txt")), None);
        assert_eq!(table.localize(Path::new("/somewhere/else")), None);
    }

    #[test]
    fn test_release_all_leaves_nothing() {
        let temp_dir = tree();
        let mut backend = ScriptedBackend::manual();
        let mut table = PathTable::new(true);
        table.add_root(&mut backend, temp_dir.path(), true).unwrap();

        table.release_all(&mut backend);

        assert!(table.roots().is_empty());
        assert_eq!(table.subdir_count(), 0);
        assert_eq!(backend.registered_count(), 0);
    }
}
