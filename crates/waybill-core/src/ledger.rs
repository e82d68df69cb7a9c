//! Ordered cargo containers with cached aggregates, and the transfer
//! algorithm that moves cargo between them.
//!
//! A [`CargoLedger`] owns an ordered list of [`UnitId`] handles (arrival
//! order) plus two aggregates: total count and count-weighted days in
//! transit. Specialisations plug extra aggregates in through a
//! [`LedgerCache`]:
//!
//! - [`VehicleCache`](crate::vehicle::VehicleCache) tracks total feeder share.
//! - [`StationCache`](crate::station::StationCache) tracks a next-hop histogram.
//!
//! Every insert and delete is bracketed by `add_to_cache` and
//! `remove_from_cache` so no aggregate can drift from the sum over the units.
//!
//! # Determinism
//!
//! Units are visited front to back. Merge candidates are scanned back to
//! front, so new cargo joins the most recent compatible unit. Both orders
//! decide which payment events happen and must not change.

use crate::arena::{ArenaError, CargoArena};
use crate::fixed::{ratio_to_fixed64, Fixed64, Money};
use crate::id::{CargoTypeId, OrderId, StationId, TileIndex, UnitId};
use crate::payment::PaymentSink;
use crate::routing::{RouteHop, RoutingOracle};
use crate::unit::{CargoUnit, MAX_UNIT_COUNT};

// ---------------------------------------------------------------------------
// Cache capability
// ---------------------------------------------------------------------------

/// Extra aggregates kept by a ledger specialisation.
///
/// The ledger calls `add_to_cache` after a unit joins and `remove_from_cache`
/// before it leaves or changes. Implementations must be exact inverses.
pub trait LedgerCache: Default + std::fmt::Debug {
    fn add_to_cache(&mut self, unit: &CargoUnit);
    fn remove_from_cache(&mut self, unit: &CargoUnit);
    /// Forget all aggregates ahead of a full rebuild.
    fn clear(&mut self);
}

/// No extra aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoCache;

impl LedgerCache for NoCache {
    fn add_to_cache(&mut self, _unit: &CargoUnit) {}
    fn remove_from_cache(&mut self, _unit: &CargoUnit) {}
    fn clear(&mut self) {}
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned when a ledger refuses a unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger holds {held} items and cannot take {incoming} more")]
    CountOverflow { held: u32, incoming: u32 },
    #[error("stale cargo unit handle")]
    StaleHandle,
}

// ---------------------------------------------------------------------------
// Transfer types
// ---------------------------------------------------------------------------

/// How moved cargo is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransferMode {
    /// Consumed at its destination; paid and destroyed.
    FinalDelivery,
    /// Picked up by a vehicle for a specific upcoming order.
    CargoLoad,
    /// Changes carrier without being delivered; earns feeder share.
    Transfer,
    /// Forced unload regardless of destination.
    Unload,
    /// Moved as-is. Units without a destination are skipped.
    NoAction,
}

/// Collaborators and location for one transfer.
pub struct TransferContext<'a> {
    pub oracle: &'a dyn RoutingOracle,
    pub payment: &'a mut dyn PaymentSink,
    /// The station where the transfer happens.
    pub station: StationId,
    /// Tile recorded as the load location of cargo picked up here.
    pub station_tile: TileIndex,
    pub cargo: CargoTypeId,
    /// The order being served. For loading, only cargo hinted with this
    /// order is picked up.
    pub order: Option<OrderId>,
}

impl std::fmt::Debug for TransferContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("station", &self.station)
            .field("station_tile", &self.station_tile)
            .field("cargo", &self.cargo)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// The outcome of one [`CargoLedger::transfer`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferResult {
    /// Items that left the source ledger by moving or delivery. Never more
    /// than the requested maximum.
    pub moved: u32,
    /// Items consumed by final delivery.
    pub delivered: u32,
    /// Items moved under Transfer semantics.
    pub transferred: u32,
    /// Feeder share credited by transfers.
    pub feeder_share_paid: Money,
    /// Items destroyed because their destination became unreachable.
    pub dropped: u32,
    /// Units remain that could not be processed this call.
    pub pending: bool,
    /// The transfer stopped early because the arena was full.
    pub allocation_failed: bool,
}

/// What happened to the unit at the cursor.
enum Visit {
    /// Still at the same index.
    Kept,
    /// Gone from the ledger; the next unit now sits at the same index.
    Removed,
    /// Partly moved; the remainder stays at the same index.
    Partial,
    Aborted(ArenaError),
}

// ---------------------------------------------------------------------------
// CargoLedger
// ---------------------------------------------------------------------------

/// An ordered multiset of cargo units with cached aggregates.
#[derive(Debug, Clone)]
pub struct CargoLedger<C: LedgerCache> {
    units: Vec<UnitId>,
    count: u32,
    days_weighted: u64,
    max_unit_count: u32,
    pub(crate) cache: C,
}

impl<C: LedgerCache> Default for CargoLedger<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: LedgerCache> CargoLedger<C> {
    pub fn new() -> Self {
        Self::with_max_unit_count(MAX_UNIT_COUNT)
    }

    /// Create a ledger whose merges never produce a unit above `max_unit_count`.
    pub fn with_max_unit_count(max_unit_count: u32) -> Self {
        Self {
            units: Vec::new(),
            count: 0,
            days_weighted: 0,
            max_unit_count: max_unit_count.max(1),
            cache: C::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Total cargo count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Sum of `count * days_in_transit` over all units.
    pub fn days_in_transit_weighted(&self) -> u64 {
        self.days_weighted
    }

    /// Count-weighted mean age in days. Zero for an empty ledger.
    pub fn average_days_in_transit(&self) -> Fixed64 {
        ratio_to_fixed64(self.days_weighted, u64::from(self.count)).unwrap_or(Fixed64::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of distinct units (not items).
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn max_unit_count(&self) -> u32 {
        self.max_unit_count
    }

    /// Items this ledger can still take before its count overflows.
    pub fn headroom(&self) -> u32 {
        u32::MAX - self.count
    }

    /// Handles in arrival order.
    pub fn unit_ids(&self) -> &[UnitId] {
        &self.units
    }

    /// Units in arrival order.
    pub fn iter<'a>(&'a self, arena: &'a CargoArena) -> impl Iterator<Item = &'a CargoUnit> + 'a {
        self.units.iter().map(move |&id| arena.unit(id))
    }

    /// Source station of the oldest unit.
    pub fn source_station_of_first(&self, arena: &CargoArena) -> Option<StationId> {
        self.units.first().map(|&id| arena.unit(id).source_station())
    }

    /// Read access to the specialisation's aggregates.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Cache bracketing
    // -----------------------------------------------------------------------

    fn add_to_cache(&mut self, unit: &CargoUnit) {
        self.count += unit.count;
        self.days_weighted += u64::from(unit.count) * u64::from(unit.days_in_transit);
        self.cache.add_to_cache(unit);
    }

    fn remove_from_cache(&mut self, unit: &CargoUnit) {
        debug_assert!(self.count >= unit.count, "ledger count underflow");
        self.count -= unit.count;
        self.days_weighted -= u64::from(unit.count) * u64::from(unit.days_in_transit);
        self.cache.remove_from_cache(unit);
    }

    /// Apply `f` to a contained unit with its cache contribution bracketed.
    pub(crate) fn modify_unit<R>(
        &mut self,
        arena: &mut CargoArena,
        id: UnitId,
        f: impl FnOnce(&mut CargoUnit) -> R,
    ) -> R {
        self.remove_from_cache(arena.unit(id));
        let result = f(arena.unit_mut(id));
        debug_assert!(arena.unit(id).count > 0, "unit left with zero count");
        self.add_to_cache(arena.unit(id));
        result
    }

    /// Add `delta` to the weighted-age aggregate without rebracketing.
    /// Only for aging, where counts do not change.
    pub(crate) fn bump_days_weighted(&mut self, delta: u64) {
        self.days_weighted += delta;
    }

    /// Rebuild all aggregates from the units.
    ///
    /// Needed only after bulk external mutation, e.g. restoring a snapshot.
    pub fn invalidate_cache(&mut self, arena: &CargoArena) {
        self.count = 0;
        self.days_weighted = 0;
        self.cache.clear();
        let units = std::mem::take(&mut self.units);
        for &id in &units {
            self.add_to_cache(arena.unit(id));
        }
        self.units = units;
    }

    // -----------------------------------------------------------------------
    // Append / truncate / clear
    // -----------------------------------------------------------------------

    /// Take ownership of `id`, merging it into the newest compatible unit.
    ///
    /// Refused without any change if the handle is stale or the ledger count
    /// would overflow. The unit then stays unowned in the arena.
    pub fn append(&mut self, arena: &mut CargoArena, id: UnitId) -> Result<(), LedgerError> {
        let incoming = arena.get(id).ok_or(LedgerError::StaleHandle)?;
        if incoming.count > self.headroom() {
            return Err(LedgerError::CountOverflow {
                held: self.count,
                incoming: incoming.count,
            });
        }
        self.insert(arena, id);
        Ok(())
    }

    /// [`append`](Self::append) for a live handle that fits the headroom.
    fn insert(&mut self, arena: &mut CargoArena, id: UnitId) {
        let incoming = arena.unit(id);
        let max = u64::from(self.max_unit_count);
        let target = self.units.iter().rev().copied().find(|&existing| {
            let unit = arena.unit(existing);
            unit.mergeable(incoming) && u64::from(unit.count) + u64::from(incoming.count) <= max
        });

        match target {
            None => {
                self.add_to_cache(arena.unit(id));
                self.units.push(id);
            }
            Some(target) => {
                // The merged unit keeps the target's age; only the target's
                // contribution is swapped.
                self.remove_from_cache(arena.unit(target));
                arena.absorb(target, id);
                self.add_to_cache(arena.unit(target));
            }
        }
    }

    /// Destroy units from the front until at most `max_remaining` items remain.
    ///
    /// The unit straddling the boundary is shortened in place. Returns the
    /// number of items removed.
    pub fn truncate(&mut self, arena: &mut CargoArena, max_remaining: u32) -> u32 {
        let mut removed = 0;
        while self.count > max_remaining {
            let Some(&front) = self.units.first() else {
                break;
            };
            let excess = self.count - max_remaining;
            let unit_count = arena.unit(front).count;
            if unit_count <= excess {
                self.remove_from_cache(arena.unit(front));
                self.units.remove(0);
                arena.free(front);
                removed += unit_count;
            } else {
                self.modify_unit(arena, front, |unit| unit.reduce(excess));
                removed += excess;
            }
        }
        removed
    }

    /// Destroy every unit. Returns the number of items destroyed.
    pub fn clear(&mut self, arena: &mut CargoArena) -> u32 {
        let removed = self.count;
        for id in self.units.drain(..) {
            arena.free(id);
        }
        self.count = 0;
        self.days_weighted = 0;
        self.cache.clear();
        removed
    }

    /// Remove the unit at `index` and destroy it. Returns its count.
    pub(crate) fn drop_at(&mut self, arena: &mut CargoArena, index: usize) -> u32 {
        let id = self.units.remove(index);
        self.remove_from_cache(arena.unit(id));
        arena.free(id).map(|unit| unit.count).unwrap_or(0)
    }

    /// Position of `id` in arrival order.
    pub(crate) fn index_of(&self, id: UnitId) -> Option<usize> {
        self.units.iter().position(|&u| u == id)
    }

    /// Set the routing hint of a contained unit.
    pub(crate) fn set_hint(
        &mut self,
        arena: &mut CargoArena,
        id: UnitId,
        next_hop: Option<OrderId>,
        next_station: Option<StationId>,
    ) {
        self.modify_unit(arena, id, |unit| {
            unit.next_hop = next_hop;
            unit.next_station = next_station;
        });
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Move up to `max_move` items from `self` into `dest` under `mode`.
    ///
    /// Units are processed front to back. For each unit the routing oracle
    /// may turn a transfer into a delivery (final hop) or a delivery into a
    /// transfer (intermediate hop), or the unit may be dropped because its
    /// destination became unreachable. Loading runs a strict pass for
    /// `ctx.order` and, if that moved nothing, a relaxed pass for cargo
    /// without a hint.
    ///
    /// If the arena fills up while splitting a unit, the transfer stops at
    /// once with `pending` and `allocation_failed` set; the unsplit unit stays
    /// in `self` intact. `max_move` is capped at the headroom of `dest`.
    pub fn transfer<D: LedgerCache>(
        &mut self,
        arena: &mut CargoArena,
        dest: &mut CargoLedger<D>,
        mut max_move: u32,
        mode: TransferMode,
        ctx: &mut TransferContext<'_>,
    ) -> TransferResult {
        let mut result = TransferResult::default();
        max_move = max_move.min(dest.headroom());

        for phase in 0..2 {
            let wanted = if phase == 0 {
                ctx.order
            } else {
                let relax = mode == TransferMode::CargoLoad
                    && ctx.order.is_some()
                    && max_move > 0
                    && result.moved == 0
                    && self.iter(arena).any(|unit| unit.next_hop.is_none());
                if !relax {
                    break;
                }
                None
            };

            let mut index = 0;
            while index < self.units.len() && max_move > 0 {
                match self.visit(arena, dest, index, &mut max_move, mode, wanted, ctx, &mut result) {
                    Visit::Kept => index += 1,
                    Visit::Removed | Visit::Partial => {}
                    Visit::Aborted(err) => {
                        tracing::warn!(
                            station = ?ctx.station,
                            cargo = ?ctx.cargo,
                            error = %err,
                            "cargo transfer aborted"
                        );
                        result.pending = true;
                        result.allocation_failed = true;
                        return result;
                    }
                }
            }
            result.pending = index < self.units.len();
        }

        tracing::debug!(
            station = ?ctx.station,
            cargo = ?ctx.cargo,
            ?mode,
            moved = result.moved,
            delivered = result.delivered,
            dropped = result.dropped,
            pending = result.pending,
            "cargo transfer"
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn visit<D: LedgerCache>(
        &mut self,
        arena: &mut CargoArena,
        dest: &mut CargoLedger<D>,
        index: usize,
        max_move: &mut u32,
        mode: TransferMode,
        wanted: Option<OrderId>,
        ctx: &mut TransferContext<'_>,
        result: &mut TransferResult,
    ) -> Visit {
        let id = self.units[index];
        let mut unit_mode = mode;
        let mut new_hint = None;

        if mode == TransferMode::CargoLoad {
            if arena.unit(id).needs_routing() {
                let query = ctx
                    .oracle
                    .find_route_link(ctx.station, ctx.cargo, arena.unit(id), None);
                if !query.found {
                    self.drop_unreachable(arena, index, ctx, result);
                    return Visit::Removed;
                }
                let (hop, station) = query.hint();
                self.set_hint(arena, id, hop, station);
            }
            if arena.unit(id).next_hop != wanted {
                return Visit::Kept;
            }
        } else if arena.unit(id).destination.is_some() {
            let query = ctx
                .oracle
                .find_route_link(ctx.station, ctx.cargo, arena.unit(id), ctx.order);
            match query.hop() {
                RouteHop::Unreachable => {
                    self.drop_unreachable(arena, index, ctx, result);
                    return Visit::Removed;
                }
                RouteHop::Intermediate { link, .. } => {
                    // Onward travel on the order being served: stays aboard.
                    if mode != TransferMode::Unload && Some(link.origin_order) == ctx.order {
                        return Visit::Kept;
                    }
                    unit_mode = TransferMode::Transfer;
                    new_hint = Some(query.hint());
                }
                RouteHop::Final => unit_mode = TransferMode::FinalDelivery,
            }
        }

        let unit = arena.unit(id);
        if (unit.destination.is_none() && mode == TransferMode::NoAction)
            || (unit_mode == TransferMode::FinalDelivery && unit.source_station() == ctx.station)
        {
            return Visit::Kept;
        }

        let count = unit.count;
        if count <= *max_move {
            self.remove_from_cache(arena.unit(id));
            self.units.remove(index);
            *max_move -= count;
            result.moved += count;

            if unit_mode == TransferMode::FinalDelivery {
                ctx.payment.pay_final_delivery(arena.unit(id), count);
                arena.free(id);
                result.delivered += count;
            } else {
                prepare_moved(arena, id, count, unit_mode, new_hint, ctx, result);
                dest.insert(arena, id);
            }
            return Visit::Removed;
        }

        let amount = *max_move;
        if unit_mode == TransferMode::FinalDelivery {
            // Consumed in place; no new unit needed.
            ctx.payment.pay_final_delivery(arena.unit(id), amount);
            self.modify_unit(arena, id, |unit| {
                unit.count -= amount;
                unit.feeder_share = 0;
            });
            result.delivered += amount;
        } else {
            let split = self.split_unit(arena, id, amount);
            let fragment = match split {
                Ok(fragment) => fragment,
                Err(err) => return Visit::Aborted(err),
            };
            prepare_moved(arena, fragment, amount, unit_mode, new_hint, ctx, result);
            dest.insert(arena, fragment);
        }
        *max_move = 0;
        result.moved += amount;
        Visit::Partial
    }

    /// Split with the source's cache contribution bracketed.
    fn split_unit(
        &mut self,
        arena: &mut CargoArena,
        id: UnitId,
        amount: u32,
    ) -> Result<UnitId, ArenaError> {
        self.remove_from_cache(arena.unit(id));
        let split = arena.split(id, amount);
        self.add_to_cache(arena.unit(id));
        split
    }

    fn drop_unreachable(
        &mut self,
        arena: &mut CargoArena,
        index: usize,
        ctx: &TransferContext<'_>,
        result: &mut TransferResult,
    ) {
        let count = self.drop_at(arena, index);
        tracing::warn!(
            station = ?ctx.station,
            cargo = ?ctx.cargo,
            count,
            "dropping cargo with unreachable destination"
        );
        result.dropped += count;
    }
}

/// Per-mode bookkeeping on a unit that is about to join the destination ledger.
fn prepare_moved(
    arena: &mut CargoArena,
    id: UnitId,
    count: u32,
    mode: TransferMode,
    new_hint: Option<(Option<OrderId>, Option<StationId>)>,
    ctx: &mut TransferContext<'_>,
    result: &mut TransferResult,
) {
    match mode {
        TransferMode::CargoLoad => {
            arena.unit_mut(id).loaded_at_tile = ctx.station_tile;
        }
        TransferMode::Transfer => {
            let share = ctx.payment.pay_transfer(arena.unit(id), count);
            let unit = arena.unit_mut(id);
            unit.feeder_share += share;
            if let Some((hop, station)) = new_hint {
                unit.next_hop = hop;
                unit.next_station = station;
            }
            result.transferred += count;
            result.feeder_share_paid += share;
        }
        TransferMode::Unload | TransferMode::NoAction | TransferMode::FinalDelivery => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
