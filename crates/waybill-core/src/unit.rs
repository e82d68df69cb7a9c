//! The cargo unit: one quantity of a single cargo type in transit.
//!
//! A unit is only ever changed through the ledger that owns it. Counts, ages
//! and routing hints feed the ledger's cached aggregates, so their fields are
//! crate-private and exposed through getters.

use crate::fixed::{proportional_share, Money};
use crate::id::{OrderId, SourceId, StationId, TileIndex};
use serde::{Deserialize, Serialize};

/// Largest count a single unit may hold after a merge.
pub const MAX_UNIT_COUNT: u32 = u16::MAX as u32;

/// Upper bound of [`CargoUnit::days_in_transit`]. Aging saturates here.
pub const MAX_DAYS_IN_TRANSIT: u8 = u8::MAX;

// ---------------------------------------------------------------------------
// Origin and destination
// ---------------------------------------------------------------------------

/// What kind of entity produced or will accept the cargo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Industry,
    Town,
    Headquarters,
}

/// Where a unit was first handed to the transport network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Station the cargo was produced at.
    pub station: StationId,
    /// Tile of that station at production time.
    pub tile: TileIndex,
    pub kind: SourceKind,
    pub id: SourceId,
}

/// The final destination of a routed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub tile: TileIndex,
    pub kind: SourceKind,
    pub id: SourceId,
}

// ---------------------------------------------------------------------------
// CargoUnit
// ---------------------------------------------------------------------------

/// A discrete amount of one cargo type with shared origin, destination and
/// routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoUnit {
    pub(crate) count: u32,
    pub(crate) days_in_transit: u8,
    pub(crate) feeder_share: Money,
    pub(crate) origin: Origin,
    pub(crate) destination: Option<Destination>,
    pub(crate) loaded_at_tile: TileIndex,
    pub(crate) next_hop: Option<OrderId>,
    pub(crate) next_station: Option<StationId>,
}

impl CargoUnit {
    /// Fresh cargo at its origin station: zero age, no feeder share, no hint.
    ///
    /// `count` must be non-zero.
    pub fn new(origin: Origin, count: u32, destination: Option<Destination>) -> Self {
        debug_assert!(count > 0, "cargo unit created with zero count");
        Self {
            count,
            days_in_transit: 0,
            feeder_share: 0,
            origin,
            destination,
            loaded_at_tile: origin.tile,
            next_hop: None,
            next_station: None,
        }
    }

    /// Set age and accrued feeder share. Used when restoring saved cargo.
    pub fn with_history(mut self, days_in_transit: u8, feeder_share: Money) -> Self {
        self.days_in_transit = days_in_transit;
        self.feeder_share = feeder_share;
        self
    }

    /// Set the loading location. Used when restoring saved cargo.
    pub fn with_loaded_at(mut self, tile: TileIndex) -> Self {
        self.loaded_at_tile = tile;
        self
    }

    /// Set the routing hint. Used when restoring saved cargo.
    pub fn with_next_hop(mut self, order: Option<OrderId>, station: Option<StationId>) -> Self {
        self.next_hop = order;
        self.next_station = station;
        self
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn days_in_transit(&self) -> u8 {
        self.days_in_transit
    }

    pub fn feeder_share(&self) -> Money {
        self.feeder_share
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn source_station(&self) -> StationId {
        self.origin.station
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn loaded_at_tile(&self) -> TileIndex {
        self.loaded_at_tile
    }

    /// The order this unit wants to leave its current station with.
    pub fn next_hop(&self) -> Option<OrderId> {
        self.next_hop
    }

    /// The station this unit wants to be unloaded at next.
    pub fn next_station(&self) -> Option<StationId> {
        self.next_station
    }

    /// Has a destination but no cached next hop.
    pub fn needs_routing(&self) -> bool {
        self.destination.is_some() && self.next_hop.is_none()
    }

    /// Feeder share attributable to `count` items of this unit (floor).
    pub fn feeder_share_for(&self, count: u32) -> Money {
        proportional_share(self.feeder_share, count, self.count)
    }

    /// Whether `other` may be folded into `self`.
    ///
    /// Compares origin, destination, routing hint and load location. Age and
    /// feeder share are deliberately not compared.
    pub fn mergeable(&self, other: &CargoUnit) -> bool {
        self.origin == other.origin
            && self.destination == other.destination
            && self.next_hop == other.next_hop
            && self.next_station == other.next_station
            && self.loaded_at_tile == other.loaded_at_tile
    }

    /// Detach `new_count` items into a new unit.
    ///
    /// The split-off part receives `feeder_share * new_count / count`; the
    /// remainder of the division stays with `self`. Callers must check arena
    /// capacity first (see [`CargoArena::split`](crate::arena::CargoArena::split)).
    pub(crate) fn split_off(&mut self, new_count: u32) -> CargoUnit {
        debug_assert!(new_count > 0 && new_count < self.count, "split outside (0, count)");
        let share = self.feeder_share_for(new_count);
        self.count -= new_count;
        self.feeder_share -= share;
        CargoUnit {
            count: new_count,
            feeder_share: share,
            ..self.clone()
        }
    }

    /// Fold `other` into `self`. Age stays with `self`.
    pub(crate) fn absorb(&mut self, other: CargoUnit) {
        debug_assert!(self.mergeable(&other), "merging non-mergeable units");
        self.count += other.count;
        self.feeder_share += other.feeder_share;
    }

    /// Remove `amount` items in place, taking their proportional feeder
    /// share with them. Returns the share removed.
    pub(crate) fn reduce(&mut self, amount: u32) -> Money {
        debug_assert!(amount < self.count, "reduce would empty the unit");
        let share = self.feeder_share_for(amount);
        self.count -= amount;
        self.feeder_share -= share;
        share
    }

    /// One day older. Returns false once the age has saturated.
    pub(crate) fn age(&mut self) -> bool {
        if self.days_in_transit == MAX_DAYS_IN_TRANSIT {
            return false;
        }
        self.days_in_transit += 1;
        true
    }
}
