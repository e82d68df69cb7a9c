//! Cargo waiting at a station.
//!
//! A station ledger keeps a histogram of waiting cargo by desired next-hop
//! order, so "how much wants to leave via order X" is a map lookup. Routing
//! hints go stale as the network changes; [`periodic_rescan`] re-asks the
//! oracle for a bounded window of units per call, walking a cursor around
//! the ledger.
//!
//! [`periodic_rescan`]: CargoLedger::periodic_rescan

use crate::arena::CargoArena;
use crate::id::{CargoTypeId, OrderId, SourceId, StationId, UnitId};
use crate::ledger::{CargoLedger, LedgerCache};
use crate::routing::RoutingOracle;
use crate::unit::{CargoUnit, SourceKind};
use std::collections::BTreeMap;

/// Next-hop histogram and rescan cursor of a station ledger.
///
/// Units without a next-hop order are not counted in the histogram. The
/// cursor is not an aggregate and survives a cache rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationCache {
    next_hop_count: BTreeMap<OrderId, u32>,
    rescan_cursor: usize,
}

impl LedgerCache for StationCache {
    fn add_to_cache(&mut self, unit: &CargoUnit) {
        if let Some(order) = unit.next_hop {
            *self.next_hop_count.entry(order).or_insert(0) += unit.count;
        }
    }

    fn remove_from_cache(&mut self, unit: &CargoUnit) {
        let Some(order) = unit.next_hop else {
            return;
        };
        debug_assert!(
            self.next_hop_count.contains_key(&order),
            "removing cargo for an order missing from the histogram"
        );
        if let Some(count) = self.next_hop_count.get_mut(&order) {
            debug_assert!(*count >= unit.count, "next-hop histogram underflow");
            *count -= unit.count;
            if *count == 0 {
                self.next_hop_count.remove(&order);
            }
        }
    }

    fn clear(&mut self) {
        self.next_hop_count.clear();
    }
}

/// Which hints a bulk invalidation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintTarget {
    /// Hints that leave via this order.
    Order(OrderId),
    /// Hints that unload at this station next.
    Station(StationId),
}

/// Outcome of one [`CargoLedger::periodic_rescan`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanResult {
    /// Units inspected.
    pub visited: usize,
    /// Units whose hint was recomputed.
    pub rerouted: usize,
    /// Items dropped because their destination became unreachable.
    pub dropped: u32,
}

/// A ledger at a station.
pub type StationCargoLedger = CargoLedger<StationCache>;

impl CargoLedger<StationCache> {
    /// Items waiting to leave via `order`.
    pub fn count_for_next_hop(&self, order: OrderId) -> u32 {
        self.cache.next_hop_count.get(&order).copied().unwrap_or(0)
    }

    /// The whole histogram, ordered by order id.
    pub fn next_hops(&self) -> &BTreeMap<OrderId, u32> {
        &self.cache.next_hop_count
    }

    pub fn rescan_cursor(&self) -> usize {
        self.cache.rescan_cursor
    }

    /// A cursor past the end restarts at the front.
    pub(crate) fn set_rescan_cursor(&mut self, cursor: usize) {
        self.cache.rescan_cursor = if cursor < self.len() { cursor } else { 0 };
    }

    /// Ask the oracle for a fresh hint for `id`.
    ///
    /// Returns `false` if the unit was dropped because its destination is
    /// unreachable (or if `id` is not in this ledger).
    pub fn recompute_next_hop(
        &mut self,
        arena: &mut CargoArena,
        id: UnitId,
        oracle: &dyn RoutingOracle,
        station: StationId,
        cargo: CargoTypeId,
    ) -> bool {
        match self.index_of(id) {
            Some(index) => self.recompute_at(arena, index, oracle, station, cargo).is_ok(),
            None => false,
        }
    }

    /// `Err(count)` when the unit was dropped.
    fn recompute_at(
        &mut self,
        arena: &mut CargoArena,
        index: usize,
        oracle: &dyn RoutingOracle,
        station: StationId,
        cargo: CargoTypeId,
    ) -> Result<(), u32> {
        let id = self.unit_ids()[index];
        let query = oracle.find_route_link(station, cargo, arena.unit(id), None);
        if !query.found {
            let count = self.drop_at(arena, index);
            tracing::warn!(?station, ?cargo, count, "dropping waiting cargo with unreachable destination");
            return Err(count);
        }
        let (hop, next_station) = query.hint();
        self.set_hint(arena, id, hop, next_station);
        Ok(())
    }

    /// Re-evaluate the hints of up to `window` units, starting at the cursor.
    ///
    /// Only units with a destination are re-routed. The cursor advances past
    /// every inspected unit and wraps at the end, so repeated calls cover the
    /// whole ledger without any one call touching more than `window` units.
    pub fn periodic_rescan(
        &mut self,
        arena: &mut CargoArena,
        oracle: &dyn RoutingOracle,
        station: StationId,
        cargo: CargoTypeId,
        window: usize,
    ) -> RescanResult {
        let mut result = RescanResult::default();
        let mut cursor = self.cache.rescan_cursor;
        let mut budget = window.min(self.len());

        while budget > 0 && !self.is_empty() {
            if cursor >= self.len() {
                cursor = 0;
            }
            budget -= 1;
            result.visited += 1;

            let id = self.unit_ids()[cursor];
            if arena.unit(id).destination.is_none() {
                cursor += 1;
                continue;
            }
            match self.recompute_at(arena, cursor, oracle, station, cargo) {
                Ok(()) => {
                    result.rerouted += 1;
                    cursor += 1;
                }
                Err(count) => result.dropped += count,
            }
        }

        self.cache.rescan_cursor = if self.is_empty() { 0 } else { cursor % self.len() };
        if result.visited > 0 {
            tracing::debug!(
                ?station,
                ?cargo,
                visited = result.visited,
                rerouted = result.rerouted,
                dropped = result.dropped,
                "station cargo rescan"
            );
        }
        result
    }

    /// Clear every hint that leaves via the given order or unloads at the
    /// given station. Returns the number of units touched.
    pub fn clear_hints_to(&mut self, arena: &mut CargoArena, target: HintTarget) -> usize {
        let matching: Vec<UnitId> = self
            .unit_ids()
            .iter()
            .copied()
            .filter(|&id| {
                let unit = arena.unit(id);
                match target {
                    HintTarget::Order(order) => unit.next_hop == Some(order),
                    HintTarget::Station(station) => unit.next_station == Some(station),
                }
            })
            .collect();
        for &id in &matching {
            self.set_hint(arena, id, None, None);
        }
        matching.len()
    }

    /// Clear the hints of every unit headed for the given destination
    /// entity, so they are re-routed on next use. Returns the number of
    /// units touched.
    pub fn clear_hints_for_destination(
        &mut self,
        arena: &mut CargoArena,
        kind: SourceKind,
        id: SourceId,
    ) -> usize {
        let matching: Vec<UnitId> = self
            .unit_ids()
            .iter()
            .copied()
            .filter(|&unit_id| {
                let unit = arena.unit(unit_id);
                unit.destination.is_some_and(|d| d.kind == kind && d.id == id)
                    && (unit.next_hop.is_some() || unit.next_station.is_some())
            })
            .collect();
        for &unit_id in &matching {
            self.set_hint(arena, unit_id, None, None);
        }
        matching.len()
    }
}
