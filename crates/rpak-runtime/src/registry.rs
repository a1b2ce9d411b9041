//! Global GUID → asset registry.
//!
//! An open-addressed table with linear probing. Probes start at
//! `guid & mask` and never run longer than the capacity. Removed entries
//! become tombstones so that probe chains through them stay intact. Once
//! tombstones make up a quarter of the table it is rebuilt from the live
//! entries; an emptied table is reset outright.

use log::trace;
use parking_lot::RwLock;
use rpak_common::PakGuid;
use rpak_format::PagePtr;

use crate::error::RegistryError;
use crate::{FxHashSet, PakHandle};

/// Where a registered asset lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub guid: PakGuid,
    pub pak: PakHandle,
    /// Position in the owning container's asset table.
    pub asset_index: u32,
    pub head: PagePtr,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(RegistryEntry),
}

struct Table {
    slots: Vec<Slot>,
    len: usize,
    tombstones: usize,
}

impl Table {
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn find(&self, guid: PakGuid) -> Option<usize> {
        let mask = self.mask();
        let start = guid.value() as usize & mask;
        for step in 0..self.slots.len() {
            let index = (start + step) & mask;
            match self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(entry) if entry.guid == guid => return Some(index),
                _ => {}
            }
        }
        None
    }

    fn insert(&mut self, entry: RegistryEntry) {
        let mask = self.mask();
        let start = entry.guid.value() as usize & mask;
        for step in 0..self.slots.len() {
            let index = (start + step) & mask;
            match self.slots[index] {
                Slot::Occupied(_) => continue,
                Slot::Tombstone => self.tombstones -= 1,
                Slot::Empty => {}
            }
            self.slots[index] = Slot::Occupied(entry);
            self.len += 1;
            return;
        }
    }

    /// Drop tombstones once they start lengthening misses.
    fn compact(&mut self) {
        if self.len == 0 {
            self.slots.fill(Slot::Empty);
            self.tombstones = 0;
            return;
        }
        if self.tombstones * 4 < self.slots.len() {
            return;
        }

        let live: Vec<RegistryEntry> = self
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(entry) => Some(*entry),
                _ => None,
            })
            .collect();
        trace!("registry: rehashing {} entries over {} tombstones", live.len(), self.tombstones);
        self.slots.fill(Slot::Empty);
        self.len = 0;
        self.tombstones = 0;
        for entry in live {
            self.insert(entry);
        }
    }
}

pub struct AssetRegistry {
    table: RwLock<Table>,
}

impl AssetRegistry {
    /// A registry holding up to `capacity` entries, rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            table: RwLock::new(Table {
                slots: vec![Slot::Empty; capacity],
                len: 0,
                tombstones: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.read().slots.len()
    }

    pub fn len(&self) -> usize {
        self.table.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removed slots not yet reclaimed.
    pub fn tombstones(&self) -> usize {
        self.table.read().tombstones
    }

    pub fn lookup(&self, guid: PakGuid) -> Option<RegistryEntry> {
        let table = self.table.read();
        table.find(guid).and_then(|index| match table.slots[index] {
            Slot::Occupied(entry) => Some(entry),
            _ => None,
        })
    }

    /// Insert every entry, or none of them.
    pub fn publish(&self, entries: &[RegistryEntry]) -> Result<(), RegistryError> {
        let mut table = self.table.write();

        if table.len + entries.len() > table.slots.len() {
            return Err(RegistryError::Full {
                len: table.len,
                requested: entries.len(),
                capacity: table.slots.len(),
            });
        }

        let mut batch = FxHashSet::default();
        for entry in entries {
            if !batch.insert(entry.guid) || table.find(entry.guid).is_some() {
                return Err(RegistryError::DuplicateGuid(entry.guid));
            }
        }

        for entry in entries {
            table.insert(*entry);
        }
        trace!("registry: published {} entries, {} total", entries.len(), table.len);
        Ok(())
    }

    /// Remove the entries for `guids` that belong to `pak`.
    pub fn remove(&self, pak: PakHandle, guids: impl IntoIterator<Item = PakGuid>) -> usize {
        let mut table = self.table.write();
        let mut removed = 0;
        for guid in guids {
            let Some(index) = table.find(guid) else {
                continue;
            };
            if matches!(table.slots[index], Slot::Occupied(entry) if entry.pak == pak) {
                table.slots[index] = Slot::Tombstone;
                table.len -= 1;
                table.tombstones += 1;
                removed += 1;
            }
        }
        if removed > 0 {
            table.compact();
        }
        removed
    }

    /// Entries currently owned by `pak`.
    pub fn entries_for(&self, pak: PakHandle) -> Vec<RegistryEntry> {
        self.table
            .read()
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(entry) if entry.pak == pak => Some(*entry),
                _ => None,
            })
            .collect()
    }
}
