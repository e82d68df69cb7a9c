//! Capacity-bounded storage for cargo units.
//!
//! The arena is the sole owner of every [`CargoUnit`]. Ledgers hold
//! [`UnitId`] handles into it. Running out of slots is an ordinary result,
//! not a panic: every creation and split path gets an [`ArenaError`] back and
//! must leave the world unchanged.

use crate::id::UnitId;
use crate::unit::CargoUnit;
use slotmap::SlotMap;

/// Default number of units an arena can hold.
pub const DEFAULT_ARENA_CAPACITY: usize = 1 << 20;

/// Errors returned by arena allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("cargo arena exhausted (capacity {capacity})")]
    Exhausted { capacity: usize },
    #[error("stale cargo unit handle")]
    StaleHandle,
    #[error("cannot split {requested} items off a unit of {count}")]
    InvalidSplit { count: u32, requested: u32 },
    #[error("merged unit would exceed {max} items", max = u32::MAX)]
    MergeOverflow,
}

/// Fixed-capacity pool of cargo units addressed by generational handles.
#[derive(Debug, Clone)]
pub struct CargoArena {
    units: SlotMap<UnitId, CargoUnit>,
    capacity: usize,
}

impl Default for CargoArena {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_CAPACITY)
    }
}

impl CargoArena {
    /// Create an empty arena that holds at most `capacity` units.
    pub fn new(capacity: usize) -> Self {
        Self {
            units: SlotMap::with_capacity_and_key(capacity.min(4096)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Whether `n` more units fit.
    pub fn can_allocate(&self, n: usize) -> bool {
        self.units.len().saturating_add(n) <= self.capacity
    }

    /// Store a unit and return its handle.
    pub fn allocate(&mut self, unit: CargoUnit) -> Result<UnitId, ArenaError> {
        if !self.can_allocate(1) {
            return Err(ArenaError::Exhausted {
                capacity: self.capacity,
            });
        }
        Ok(self.units.insert(unit))
    }

    pub fn get(&self, id: UnitId) -> Option<&CargoUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(id)
    }

    /// Destroy a unit. Returns it if the handle was live.
    pub fn free(&mut self, id: UnitId) -> Option<CargoUnit> {
        self.units.remove(id)
    }

    /// Split `new_count` items off the unit at `id` into a new unit.
    ///
    /// `new_count` must lie strictly between zero and the unit's count.
    /// Everything is checked before the source is touched, so on failure the
    /// original unit is unchanged.
    pub fn split(&mut self, id: UnitId, new_count: u32) -> Result<UnitId, ArenaError> {
        let count = self.units.get(id).ok_or(ArenaError::StaleHandle)?.count;
        if new_count == 0 || new_count >= count {
            return Err(ArenaError::InvalidSplit {
                count,
                requested: new_count,
            });
        }
        if !self.can_allocate(1) {
            return Err(ArenaError::Exhausted {
                capacity: self.capacity,
            });
        }
        let part = self.units[id].split_off(new_count);
        Ok(self.units.insert(part))
    }

    /// Fold the unit at `from` into the unit at `into` and destroy `from`.
    pub fn merge(&mut self, into: UnitId, from: UnitId) -> Result<(), ArenaError> {
        if into == from {
            return Err(ArenaError::StaleHandle);
        }
        let (Some(target), Some(other)) = (self.units.get(into), self.units.get(from)) else {
            return Err(ArenaError::StaleHandle);
        };
        if target.count.checked_add(other.count).is_none() {
            return Err(ArenaError::MergeOverflow);
        }
        self.absorb(into, from);
        Ok(())
    }

    /// Fold `from` into `into`. A stale `from` leaves `into` unchanged.
    pub(crate) fn absorb(&mut self, into: UnitId, from: UnitId) {
        if let Some(other) = self.units.remove(from) {
            self.units[into].absorb(other);
        }
    }

    /// Borrow a unit that a ledger holds.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle. Ledgers only hold live handles, so a miss
    /// here is a bookkeeping defect.
    pub(crate) fn unit(&self, id: UnitId) -> &CargoUnit {
        &self.units[id]
    }

    /// Mutable counterpart of [`unit`](Self::unit).
    pub(crate) fn unit_mut(&mut self, id: UnitId) -> &mut CargoUnit {
        &mut self.units[id]
    }

    /// Iterate all live units in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &CargoUnit)> {
        self.units.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{SourceId, StationId, TileIndex};
    use crate::unit::{Origin, SourceKind};

    fn unit(count: u32) -> CargoUnit {
        let origin = Origin {
            station: StationId(0),
            tile: TileIndex(0),
            kind: SourceKind::Town,
            id: SourceId(0),
        };
        CargoUnit::new(origin, count, None)
    }

    #[test]
    fn allocate_until_full() {
        let mut arena = CargoArena::new(2);
        assert!(arena.allocate(unit(1)).is_ok());
        assert!(arena.allocate(unit(1)).is_ok());
        assert_eq!(
            arena.allocate(unit(1)),
            Err(ArenaError::Exhausted { capacity: 2 })
        );
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn free_releases_slot() {
        let mut arena = CargoArena::new(1);
        let id = arena.allocate(unit(3)).unwrap();
        assert_eq!(arena.free(id).map(|u| u.count()), Some(3));
        assert!(!arena.contains(id));
        assert!(arena.allocate(unit(1)).is_ok());
    }

    #[test]
    fn split_on_full_arena_leaves_source_untouched() {
        let mut arena = CargoArena::new(1);
        let id = arena.allocate(unit(10)).unwrap();
        assert!(matches!(
            arena.split(id, 4),
            Err(ArenaError::Exhausted { .. })
        ));
        assert_eq!(arena.get(id).unwrap().count(), 10);
    }

    #[test]
    fn split_and_merge() {
        let mut arena = CargoArena::new(4);
        let id = arena.allocate(unit(10)).unwrap();
        let part = arena.split(id, 4).unwrap();
        assert_eq!(arena.get(id).unwrap().count(), 6);
        assert_eq!(arena.get(part).unwrap().count(), 4);

        arena.merge(id, part).unwrap();
        assert_eq!(arena.get(id).unwrap().count(), 10);
        assert!(!arena.contains(part));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn split_outside_range_is_refused() {
        let mut arena = CargoArena::new(4);
        let id = arena.allocate(unit(10)).unwrap();
        for requested in [0, 10, 11] {
            assert_eq!(
                arena.split(id, requested),
                Err(ArenaError::InvalidSplit { count: 10, requested })
            );
        }
        assert_eq!(arena.get(id).unwrap().count(), 10);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn split_of_stale_handle_fails() {
        let mut arena = CargoArena::new(4);
        let id = arena.allocate(unit(10)).unwrap();
        arena.free(id);
        assert_eq!(arena.split(id, 3), Err(ArenaError::StaleHandle));
    }

    #[test]
    fn merge_refuses_count_overflow() {
        let mut arena = CargoArena::new(4);
        let a = arena.allocate(unit(u32::MAX)).unwrap();
        let b = arena.allocate(unit(1)).unwrap();
        assert_eq!(arena.merge(a, b), Err(ArenaError::MergeOverflow));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).unwrap().count(), u32::MAX);
    }

    #[test]
    fn merge_rejects_self_and_stale() {
        let mut arena = CargoArena::new(4);
        let a = arena.allocate(unit(1)).unwrap();
        let b = arena.allocate(unit(1)).unwrap();
        assert_eq!(arena.merge(a, a), Err(ArenaError::StaleHandle));
        arena.free(b);
        assert_eq!(arena.merge(a, b), Err(ArenaError::StaleHandle));
    }

    #[test]
    fn stale_handle_after_reuse() {
        let mut arena = CargoArena::new(1);
        let old = arena.allocate(unit(1)).unwrap();
        arena.free(old);
        let new = arena.allocate(unit(2)).unwrap();
        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new).unwrap().count(), 2);
    }
}
