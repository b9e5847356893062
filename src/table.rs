/// Fixed-capacity neighbor table.
///
/// An open-addressed index of `BUCKETS` buckets maps a [`NodeId`] to a
/// handle into an arena of `RECORDS` proximity records. Lookup starts at
/// `id % BUCKETS` and probes linearly, wrapping at the end. Nothing is
/// allocated after construction and the table never grows: once the bucket
/// array or the arena is exhausted, new peers are turned away and counted.
///
/// Removal uses backward-shift deletion so no tombstones are needed and every
/// remaining key stays reachable from its home bucket.
use heapless::Vec;

use crate::packet::{NodeId, EMPTY_ID};
use crate::proximity::ProximityRecord;

/// Index into the record arena.
type Handle = u16;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    key: NodeId,
    handle: Handle,
}

const EMPTY_BUCKET: Bucket = Bucket {
    key: EMPTY_ID,
    handle: 0,
};

pub struct NeighborTable<const BUCKETS: usize, const RECORDS: usize> {
    buckets: [Bucket; BUCKETS],
    arena: [ProximityRecord; RECORDS],
    free: Vec<Handle, RECORDS>,
    len: usize,
    table_full: u32,
}

impl<const BUCKETS: usize, const RECORDS: usize> NeighborTable<BUCKETS, RECORDS> {
    pub fn new() -> Self {
        const { assert!(RECORDS <= Handle::MAX as usize + 1, "arena larger than handle range") };
        let mut free = Vec::new();
        // Reverse so handle 0 is claimed first.
        for handle in (0..RECORDS).rev() {
            let _ = free.push(handle as Handle);
        }
        Self {
            buckets: [EMPTY_BUCKET; BUCKETS],
            arena: [ProximityRecord::vacant(); RECORDS],
            free,
            len: 0,
            table_full: 0,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of records the table can ever hold.
    pub fn capacity(&self) -> usize {
        BUCKETS.min(RECORDS)
    }

    /// Number of inserts rejected because the table was full.
    pub fn table_full(&self) -> u32 {
        self.table_full
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.find(id).is_some()
    }

    pub fn get(&mut self, id: NodeId) -> Option<&mut ProximityRecord> {
        let idx = self.find(id)?;
        let handle = self.buckets[idx].handle as usize;
        self.arena.get_mut(handle)
    }

    pub fn get_ref(&self, id: NodeId) -> Option<&ProximityRecord> {
        let idx = self.find(id)?;
        self.arena.get(self.buckets[idx].handle as usize)
    }

    /// Claim a fresh record for `id`.
    ///
    /// If `id` is already tracked its record is reset in place. Returns
    /// `None` (and bumps the table-full counter) when no bucket or arena slot
    /// is left, or when `id` is the empty sentinel.
    pub fn insert_new(&mut self, id: NodeId) -> Option<&mut ProximityRecord> {
        if id == EMPTY_ID {
            return None;
        }

        if let Some(idx) = self.find(id) {
            let handle = self.buckets[idx].handle as usize;
            let record = self.arena.get_mut(handle)?;
            *record = ProximityRecord::new(id);
            return Some(record);
        }

        let Some(idx) = self.vacant_bucket(id).filter(|_| !self.free.is_empty()) else {
            self.table_full = self.table_full.wrapping_add(1);
            log::warn!(
                "Neighbor table full ({} tracked), dropping node {}",
                self.len,
                id
            );
            return None;
        };
        let handle = self.free.pop()?;

        self.buckets[idx] = Bucket { key: id, handle };
        self.len += 1;
        let record = &mut self.arena[handle as usize];
        *record = ProximityRecord::new(id);
        Some(record)
    }

    /// Stop tracking `id`. Returns whether a record was removed; removing an
    /// unknown id is a no-op.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(mut hole) = self.find(id) else {
            return false;
        };

        let handle = self.buckets[hole].handle;
        self.arena[handle as usize] = ProximityRecord::vacant();
        let _ = self.free.push(handle);
        self.buckets[hole] = EMPTY_BUCKET;
        self.len -= 1;

        // Pull later chain members back over the hole when their home bucket
        // does not lie between the hole and their current position.
        let mut idx = (hole + 1) % BUCKETS;
        for _ in 1..BUCKETS {
            let bucket = self.buckets[idx];
            if bucket.key == EMPTY_ID {
                break;
            }
            let home = Self::home(bucket.key);
            if !in_cyclic_range(home, hole, idx) {
                self.buckets[hole] = bucket;
                self.buckets[idx] = EMPTY_BUCKET;
                hole = idx;
            }
            idx = (idx + 1) % BUCKETS;
        }
        true
    }

    /// Visit every live record once, in bucket-index order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut ProximityRecord)) {
        for bucket in self.buckets.iter() {
            if bucket.key == EMPTY_ID {
                continue;
            }
            if let Some(record) = self.arena.get_mut(bucket.handle as usize) {
                f(record);
            }
        }
    }

    /// Live ids in bucket-index order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.buckets
            .iter()
            .filter(|b| b.key != EMPTY_ID)
            .map(|b| b.key)
    }

    #[inline]
    fn home(id: NodeId) -> usize {
        id as usize % BUCKETS
    }

    /// Bucket holding `id`, or `None` on a miss. A bucket whose key matches
    /// but whose record belongs to another id counts as a miss.
    fn find(&self, id: NodeId) -> Option<usize> {
        if id == EMPTY_ID || BUCKETS == 0 {
            return None;
        }
        let mut idx = Self::home(id);
        for _ in 0..BUCKETS {
            let bucket = self.buckets[idx];
            if bucket.key == id {
                let consistent = self
                    .arena
                    .get(bucket.handle as usize)
                    .is_some_and(|r| r.id == id);
                return consistent.then_some(idx);
            }
            if bucket.key == EMPTY_ID {
                return None;
            }
            idx = (idx + 1) % BUCKETS;
        }
        None
    }

    /// First empty (or stale matching) bucket on the probe path of `id`.
    fn vacant_bucket(&self, id: NodeId) -> Option<usize> {
        if BUCKETS == 0 {
            return None;
        }
        let mut idx = Self::home(id);
        for _ in 0..BUCKETS {
            let key = self.buckets[idx].key;
            if key == EMPTY_ID || key == id {
                return Some(idx);
            }
            idx = (idx + 1) % BUCKETS;
        }
        None
    }
}

impl<const BUCKETS: usize, const RECORDS: usize> Default for NeighborTable<BUCKETS, RECORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `pos` lies in the cyclic interval `(start, end]`.
fn in_cyclic_range(pos: usize, start: usize, end: usize) -> bool {
    if start <= end {
        start < pos && pos <= end
    } else {
        start < pos || pos <= end
    }
}
