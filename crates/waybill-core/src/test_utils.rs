//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::fixed::Money;
use crate::id::*;
use crate::payment::PaymentSink;
use crate::routing::{RouteQuery, RoutingOracle};
use crate::unit::{CargoUnit, Destination, Origin, SourceKind};
use std::cell::Cell;
use std::collections::BTreeMap;

// ===========================================================================
// Ids
// ===========================================================================

pub fn station_a() -> StationId {
    StationId(1)
}
pub fn station_b() -> StationId {
    StationId(2)
}
pub fn station_c() -> StationId {
    StationId(3)
}

pub fn coal() -> CargoTypeId {
    CargoTypeId(0)
}
pub fn mail() -> CargoTypeId {
    CargoTypeId(1)
}

// ===========================================================================
// Unit constructors
// ===========================================================================

/// The industry all helper cargo comes from: next to station A.
pub fn origin_at_a() -> Origin {
    Origin {
        station: station_a(),
        tile: TileIndex(100),
        kind: SourceKind::Industry,
        id: SourceId(1),
    }
}

/// A town destination identified by `n`, on tile `n`.
pub fn dest(n: u32) -> Destination {
    Destination {
        tile: TileIndex(n),
        kind: SourceKind::Town,
        id: SourceId(n as u16),
    }
}

/// Fresh cargo from station A with no destination.
pub fn plain_unit(count: u32) -> CargoUnit {
    CargoUnit::new(origin_at_a(), count, None)
}

/// Fresh cargo from station A headed for [`dest`]`(dest_n)`.
pub fn routed_unit(count: u32, dest_n: u32) -> CargoUnit {
    CargoUnit::new(origin_at_a(), count, Some(dest(dest_n)))
}

// ===========================================================================
// Routing oracle
// ===========================================================================

/// Oracle answering from a fixed table keyed by destination.
///
/// Destinations not in the table get the fallback answer, unreachable by
/// default. Counts calls so tests can assert how often routing ran.
#[derive(Debug)]
pub struct ScriptedOracle {
    routes: BTreeMap<Destination, RouteQuery>,
    fallback: RouteQuery,
    calls: Cell<usize>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
            fallback: RouteQuery::unreachable(),
            calls: Cell::new(0),
        }
    }

    pub fn route(mut self, destination: Destination, answer: RouteQuery) -> Self {
        self.routes.insert(destination, answer);
        self
    }

    pub fn fallback(mut self, answer: RouteQuery) -> Self {
        self.fallback = answer;
        self
    }

    /// Replace one entry in place, e.g. to simulate a network change.
    pub fn set_route(&mut self, destination: Destination, answer: RouteQuery) {
        self.routes.insert(destination, answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl RoutingOracle for ScriptedOracle {
    fn find_route_link(
        &self,
        _station: StationId,
        _cargo: CargoTypeId,
        unit: &CargoUnit,
        _cursor_order: Option<OrderId>,
    ) -> RouteQuery {
        self.calls.set(self.calls.get() + 1);
        unit.destination()
            .and_then(|d| self.routes.get(d).copied())
            .unwrap_or(self.fallback)
    }
}

// ===========================================================================
// Payment sink
// ===========================================================================

/// Records every payment call. Transfers credit `rate` per item.
#[derive(Debug, Default, Clone)]
pub struct RecordingPayment {
    pub rate: Money,
    pub final_deliveries: Vec<u32>,
    pub transfers: Vec<u32>,
}

impl RecordingPayment {
    pub fn new(rate: Money) -> Self {
        Self {
            rate,
            final_deliveries: Vec::new(),
            transfers: Vec::new(),
        }
    }

    pub fn delivered(&self) -> u32 {
        self.final_deliveries.iter().sum()
    }

    pub fn transferred(&self) -> u32 {
        self.transfers.iter().sum()
    }
}

impl PaymentSink for RecordingPayment {
    fn pay_final_delivery(&mut self, _unit: &CargoUnit, count: u32) {
        self.final_deliveries.push(count);
    }

    fn pay_transfer(&mut self, _unit: &CargoUnit, count: u32) -> Money {
        self.transfers.push(count);
        self.rate * Money::from(count)
    }
}
