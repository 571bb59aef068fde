//! Logical-to-physical offset bookkeeping for erasure coded files.
//!
//! Erasure fragments are shorter than the blocks they encode, so a block's
//! logical offset says nothing about where its fragments live. Every write
//! records a placement keyed by the logical offset, plus the next free
//! physical offset keyed by the logical end of the write, which is where a
//! sequential append lands.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local identity of a logical file.
pub type FileId = u64;

/// Where one written block's fragments live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the fragments in every fragment file.
    pub physical_offset: u64,
    /// Bytes per fragment.
    pub fragment_length: u64,
    /// Logical bytes the fragments decode to.
    pub block_length: u64,
}

#[derive(Default)]
struct IdentityTable {
    next_id: FileId,
    ids: HashMap<String, FileId>,
}

/// Path to file-identity map, assigned on first touch.
#[derive(Default)]
pub struct FileIdentities {
    table: Mutex<IdentityTable>,
}

impl FileIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of `path`, assigning a fresh one if the path is unknown.
    pub fn identify(&self, path: &str) -> FileId {
        let mut table = self.table.lock();
        if let Some(id) = table.ids.get(path) {
            return *id;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.ids.insert(path.to_string(), id);
        id
    }

    pub fn lookup(&self, path: &str) -> Option<FileId> {
        self.table.lock().ids.get(path).copied()
    }

    /// Drop the identity of `path`.
    ///
    /// Returns it when no other path (hard link) still names the file.
    pub fn forget(&self, path: &str) -> Option<FileId> {
        let mut table = self.table.lock();
        let id = table.ids.remove(path)?;
        table.orphaned(id)
    }

    /// Move the identity of `from` to `to`.
    ///
    /// Returns the identity `to` held before if nothing names it any more.
    /// Two links to the same file are left alone, as rename(2) does.
    pub fn rename(&self, from: &str, to: &str) -> Option<FileId> {
        let mut table = self.table.lock();
        let moved = table.ids.get(from).copied();
        if moved.is_some() && moved == table.ids.get(to).copied() {
            return None;
        }
        let displaced = table.ids.remove(to);
        if let Some(id) = table.ids.remove(from) {
            table.ids.insert(to.to_string(), id);
        }
        displaced.and_then(|id| table.orphaned(id))
    }

    /// Move every identity below directory `from` under directory `to`.
    pub fn rename_tree(&self, from: &str, to: &str) {
        let from_prefix = format!("{}/", from.trim_end_matches('/'));
        let to_prefix = format!("{}/", to.trim_end_matches('/'));
        let mut table = self.table.lock();
        let moved: Vec<(String, FileId)> = table
            .ids
            .iter()
            .filter(|(path, _)| path.starts_with(&from_prefix))
            .map(|(path, id)| (path.clone(), *id))
            .collect();
        for (path, id) in moved {
            table.ids.remove(&path);
            table
                .ids
                .insert(format!("{}{}", to_prefix, &path[from_prefix.len()..]), id);
        }
    }

    /// Make `link` a second name for the file at `existing`.
    ///
    /// Returns the shared identity, or `None` if `existing` is unknown.
    pub fn alias(&self, existing: &str, link: &str) -> Option<FileId> {
        let mut table = self.table.lock();
        let id = table.ids.get(existing).copied()?;
        table.ids.insert(link.to_string(), id);
        Some(id)
    }
}

impl IdentityTable {
    fn orphaned(&self, id: FileId) -> Option<FileId> {
        if self.ids.values().any(|&other| other == id) {
            None
        } else {
            Some(id)
        }
    }
}

#[derive(Default)]
struct Placements {
    entries: HashMap<(FileId, u64), IndexEntry>,
    next_write: HashMap<(FileId, u64), u64>,
}

/// Placement records and tracked logical sizes.
#[derive(Default)]
pub struct OffsetIndex {
    placements: Mutex<Placements>,
    sizes: Mutex<HashMap<FileId, u64>>,
}

impl OffsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide where a block written at `logical_offset` goes and record it.
    ///
    /// A rewrite reuses the block's recorded offset; otherwise the write must
    /// continue the previous one. Offset 0 always maps to physical 0.
    pub fn place(
        &self,
        path: &str,
        id: FileId,
        logical_offset: u64,
        block_length: u64,
        fragment_length: u64,
    ) -> Result<IndexEntry> {
        let mut placements = self.placements.lock();
        let physical_offset = if logical_offset == 0 {
            0
        } else if let Some(entry) = placements.entries.get(&(id, logical_offset)) {
            entry.physical_offset
        } else if let Some(next) = placements.next_write.get(&(id, logical_offset)) {
            *next
        } else {
            return Err(Error::MissingOffset {
                path: path.to_string(),
                offset: logical_offset,
            });
        };

        let entry = IndexEntry {
            physical_offset,
            fragment_length,
            block_length,
        };
        placements.entries.insert((id, logical_offset), entry);
        placements.next_write.insert(
            (id, logical_offset + block_length),
            physical_offset + fragment_length,
        );
        drop(placements);

        let mut sizes = self.sizes.lock();
        let size = sizes.entry(id).or_insert(0);
        *size = (*size).max(logical_offset + block_length);

        Ok(entry)
    }

    /// Placement of the block written at `logical_offset`.
    pub fn lookup(&self, id: FileId, logical_offset: u64) -> Option<IndexEntry> {
        self.placements
            .lock()
            .entries
            .get(&(id, logical_offset))
            .copied()
    }

    /// Tracked logical size: the largest end offset ever written.
    pub fn size(&self, id: FileId) -> u64 {
        self.sizes.lock().get(&id).copied().unwrap_or(0)
    }

    /// Forget every block starting at or past `size` and set the tracked size.
    ///
    /// Returns the physical length the fragment files can be cut to, if any
    /// block was dropped (or the file becomes empty).
    pub fn truncate(&self, id: FileId, size: u64) -> Option<u64> {
        let mut placements = self.placements.lock();
        let mut cut: Option<u64> = if size == 0 { Some(0) } else { None };
        placements.entries.retain(|(file, offset), entry| {
            if *file == id && *offset >= size {
                cut = Some(cut.map_or(entry.physical_offset, |c| c.min(entry.physical_offset)));
                false
            } else {
                true
            }
        });
        placements
            .next_write
            .retain(|(file, end), _| *file != id || *end <= size);
        drop(placements);

        self.sizes.lock().insert(id, size);
        cut
    }

    /// Drop everything recorded for `id`.
    pub fn remove_file(&self, id: FileId) {
        let mut placements = self.placements.lock();
        placements.entries.retain(|(file, _), _| *file != id);
        placements.next_write.retain(|(file, _), _| *file != id);
        drop(placements);
        self.sizes.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_assigned_once() {
        let ids = FileIdentities::new();
        let a = ids.identify("/a");
        assert_eq!(ids.identify("/a"), a);
        assert_ne!(ids.identify("/b"), a);
        assert_eq!(ids.forget("/a"), Some(a));
        assert_eq!(ids.lookup("/a"), None);
    }

    #[test]
    fn test_identity_rename_displaces_target() {
        let ids = FileIdentities::new();
        let a = ids.identify("/a");
        let b = ids.identify("/b");
        assert_eq!(ids.rename("/a", "/b"), Some(b));
        assert_eq!(ids.lookup("/b"), Some(a));
        assert_eq!(ids.lookup("/a"), None);
    }

    #[test]
    fn test_rename_tree_moves_nested_paths() {
        let ids = FileIdentities::new();
        let a = ids.identify("/d/a");
        let deep = ids.identify("/d/sub/b");
        let sibling = ids.identify("/dx/c");

        ids.rename_tree("/d", "/e");
        assert_eq!(ids.lookup("/e/a"), Some(a));
        assert_eq!(ids.lookup("/e/sub/b"), Some(deep));
        assert_eq!(ids.lookup("/d/a"), None);
        assert_eq!(ids.lookup("/dx/c"), Some(sibling));
    }

    #[test]
    fn test_alias_outlives_one_name() {
        let ids = FileIdentities::new();
        let a = ids.identify("/a");
        assert_eq!(ids.alias("/a", "/b"), Some(a));
        assert_eq!(ids.alias("/unknown", "/c"), None);

        assert_eq!(ids.forget("/a"), None);
        assert_eq!(ids.lookup("/b"), Some(a));
        assert_eq!(ids.forget("/b"), Some(a));
    }

    #[test]
    fn test_rename_between_links_is_noop() {
        let ids = FileIdentities::new();
        let a = ids.identify("/a");
        ids.alias("/a", "/b");
        assert_eq!(ids.rename("/a", "/b"), None);
        assert_eq!(ids.lookup("/a"), Some(a));
        assert_eq!(ids.lookup("/b"), Some(a));
    }

    #[test]
    fn test_sequential_placement() {
        let index = OffsetIndex::new();
        let first = index.place("/f", 1, 0, 100, 50).unwrap();
        assert_eq!(first.physical_offset, 0);

        let second = index.place("/f", 1, 100, 100, 50).unwrap();
        assert_eq!(second.physical_offset, 50);
        assert_eq!(index.size(1), 200);
    }

    #[test]
    fn test_rewrite_keeps_offset() {
        let index = OffsetIndex::new();
        index.place("/f", 1, 0, 4096, 2048).unwrap();
        index.place("/f", 1, 4096, 10, 5).unwrap();

        let rewritten = index.place("/f", 1, 4096, 20, 10).unwrap();
        assert_eq!(rewritten.physical_offset, 2048);
        assert_eq!(index.lookup(1, 4096), Some(rewritten));
        assert_eq!(index.size(1), 4116);
    }

    #[test]
    fn test_gap_is_missing_offset() {
        let index = OffsetIndex::new();
        index.place("/f", 1, 0, 10, 5).unwrap();
        let err = index.place("/f", 1, 4096, 10, 5).unwrap_err();
        assert!(matches!(err, Error::MissingOffset { offset: 4096, .. }));
    }

    #[test]
    fn test_truncate_drops_tail() {
        let index = OffsetIndex::new();
        index.place("/f", 1, 0, 100, 50).unwrap();
        index.place("/f", 1, 100, 100, 50).unwrap();

        assert_eq!(index.truncate(1, 100), Some(50));
        assert_eq!(index.lookup(1, 100), None);
        assert_eq!(index.size(1), 100);
        assert_eq!(index.place("/f", 1, 100, 10, 5).unwrap().physical_offset, 50);

        assert_eq!(index.truncate(1, 0), Some(0));
        assert_eq!(index.size(1), 0);
    }

    #[test]
    fn test_remove_file() {
        let index = OffsetIndex::new();
        index.place("/f", 7, 0, 10, 5).unwrap();
        index.remove_file(7);
        assert_eq!(index.lookup(7, 0), None);
        assert_eq!(index.size(7), 0);
    }
}
