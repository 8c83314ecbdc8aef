//! The single flat directory of a volume
//!
//! Kept in memory as a sequence of [`DirEntry`]; persisted as the contents of
//! the root file. Removing an entry tombstones it in place, so entry positions
//! stay stable until a later create reuses the slot.
use alloc::vec::Vec;

use crate::layout::{validate_name, DirEntry};
use crate::{FsError, Result};

/// In-memory copy of the root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
    capacity: usize,
}

impl Directory {
    /// An empty directory that may grow to `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Decode the directory file contents
    pub fn from_bytes(bytes: &[u8], capacity: usize) -> Result<Self> {
        if bytes.len() % DirEntry::SIZE != 0 {
            return Err(FsError::CorruptDirectory("size is not a multiple of the entry size"));
        }
        if bytes.len() / DirEntry::SIZE > capacity {
            return Err(FsError::CorruptDirectory("more entries than the directory can hold"));
        }
        let entries = bytes
            .chunks_exact(DirEntry::SIZE)
            .map(DirEntry::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries, capacity })
    }

    /// Encode every entry, tombstones included, in sequence order
    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(DirEntry::to_bytes).collect()
    }

    /// Number of slots, tombstones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no slots at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slot `index`
    pub fn entry(&self, index: usize) -> Option<&DirEntry> {
        self.entries.get(index)
    }

    /**
        Bind `name` to `fd_index` and return the slot used.

        One pass finds the first tombstone to reuse and keeps scanning for a
        live entry of the same name; a new slot is appended only when no
        tombstone exists.
    */
    pub fn create_entry(&mut self, name: &str, fd_index: usize) -> Result<usize> {
        validate_name(name)?;
        let mut reusable = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.is_unused() {
                reusable.get_or_insert(index);
            } else if entry.name() == name {
                return Err(FsError::AlreadyExists(name.into()));
            }
        }

        match reusable {
            Some(index) => {
                self.entries[index].bind(name, fd_index);
                Ok(index)
            }
            None if self.entries.len() >= self.capacity => Err(FsError::DirectoryFull),
            None => {
                self.entries.push(DirEntry::new(name, fd_index));
                Ok(self.entries.len() - 1)
            }
        }
    }

    /// Slot of the live entry called `name`
    pub fn find_entry(&self, name: &str) -> Result<usize> {
        validate_name(name)?;
        self.entries
            .iter()
            .position(|entry| !entry.is_unused() && entry.name() == name)
            .ok_or_else(|| FsError::NotFound(name.into()))
    }

    /// Tombstone slot `index` and hand back the descriptor it was bound to
    pub fn remove_entry(&mut self, index: usize) -> Option<usize> {
        let entry = self.entries.get_mut(index)?;
        let fd_index = entry.fd_index();
        entry.tombstone();
        fd_index
    }

    /// Drop trailing slots beyond `len`
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Name bound to `fd_index`, if any live entry refers to it
    pub fn name_of(&self, fd_index: usize) -> Option<&str> {
        self.live()
            .find(|entry| entry.fd_index() == Some(fd_index))
            .map(DirEntry::name)
    }

    /// Whether a live entry refers to `fd_index`
    pub fn is_bound(&self, fd_index: usize) -> bool {
        self.name_of(fd_index).is_some()
    }

    /// Live entries in sequence order
    pub fn live(&self) -> impl Iterator<Item = &DirEntry> + '_ {
        self.entries.iter().filter(|entry| !entry.is_unused())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn create_appends_and_finds() {
        let mut dir = Directory::new(4);
        assert_eq!(dir.create_entry("foo", 1), Ok(0));
        assert_eq!(dir.create_entry("bar", 2), Ok(1));
        assert_eq!(dir.find_entry("bar"), Ok(1));
        assert_eq!(dir.name_of(2), Some("bar"));
        assert_eq!(dir.find_entry("baz"), Err(FsError::NotFound("baz".into())));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut dir = Directory::new(4);
        dir.create_entry("foo", 1).unwrap();
        assert_eq!(
            dir.create_entry("foo", 2),
            Err(FsError::AlreadyExists("foo".into()))
        );
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn duplicate_check_continues_past_tombstone() {
        let mut dir = Directory::new(4);
        dir.create_entry("foo", 1).unwrap();
        dir.create_entry("bar", 2).unwrap();
        dir.remove_entry(0);
        assert_eq!(
            dir.create_entry("bar", 3),
            Err(FsError::AlreadyExists("bar".into()))
        );
        // the tombstone is still free after the failed attempt
        assert_eq!(dir.create_entry("baz", 3), Ok(0));
    }

    #[test]
    fn first_tombstone_is_reused() {
        let mut dir = Directory::new(4);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            dir.create_entry(name, i + 1).unwrap();
        }
        assert_eq!(dir.remove_entry(2), Some(3));
        assert_eq!(dir.remove_entry(0), Some(1));
        assert!(!dir.is_bound(1));
        assert_eq!(dir.create_entry("d", 1), Ok(0));
        assert_eq!(dir.create_entry("e", 3), Ok(2));
        assert_eq!(dir.create_entry("f", 4), Ok(3));
        assert_eq!(dir.len(), 4);
    }

    #[test]
    fn capacity_counts_slots_not_live_entries() {
        let mut dir = Directory::new(2);
        dir.create_entry("a", 1).unwrap();
        dir.create_entry("b", 2).unwrap();
        assert_eq!(dir.create_entry("c", 3), Err(FsError::DirectoryFull));
        dir.remove_entry(1);
        assert_eq!(dir.create_entry("c", 3), Ok(1));
    }

    #[test]
    fn removed_names_are_not_found() {
        let mut dir = Directory::new(4);
        dir.create_entry("foo", 1).unwrap();
        dir.remove_entry(0);
        assert!(dir.find_entry("foo").is_err());
        assert_eq!(dir.live().count(), 0);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn bytes_round_trip_keeps_tombstones() {
        let mut dir = Directory::new(4);
        dir.create_entry("foo", 1).unwrap();
        dir.create_entry("bar", 2).unwrap();
        dir.remove_entry(0);
        let bytes = dir.to_bytes();
        assert_eq!(bytes.len(), 2 * DirEntry::SIZE);
        assert_eq!(Directory::from_bytes(&bytes, 4).unwrap(), dir);
    }

    #[test]
    fn corrupt_payloads_are_rejected() {
        assert!(matches!(
            Directory::from_bytes(&[0u8; 17], 4),
            Err(FsError::CorruptDirectory(_))
        ));
        assert!(matches!(
            Directory::from_bytes(&vec![0u8; 5 * DirEntry::SIZE], 4),
            Err(FsError::CorruptDirectory(_))
        ));
        assert!(Directory::from_bytes(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn names_are_validated() {
        let mut dir = Directory::new(4);
        assert!(matches!(
            dir.create_entry("a-very-long-name", 1),
            Err(FsError::NameTooLong(_))
        ));
        assert!(matches!(dir.find_entry(""), Err(FsError::InvalidName(_))));
    }
}
