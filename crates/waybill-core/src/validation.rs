//! Consistency audits for ledgers and whole networks.
//!
//! Every cached aggregate is recomputed from the units and compared with the
//! cached value. The audits never mutate anything and return an empty list
//! when the state is consistent.

use crate::arena::CargoArena;
use crate::fixed::Money;
use crate::id::{CargoTypeId, OrderId, StationId, UnitId, VehicleId};
use crate::ledger::{CargoLedger, LedgerCache};
use crate::network::CargoNetwork;
use crate::station::StationCargoLedger;
use crate::unit::MAX_UNIT_COUNT;
use crate::vehicle::VehicleCargoLedger;
use slotmap::SecondaryMap;
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Violation types
// ---------------------------------------------------------------------------

/// Which ledger a violation was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSite {
    /// A ledger audited on its own.
    Detached,
    Station(StationId, CargoTypeId),
    Vehicle(VehicleId, CargoTypeId),
    /// Not tied to one ledger, e.g. a unit nobody owns.
    Arena,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    CountMismatch { cached: u32, actual: u64 },
    DaysWeightedMismatch { cached: u64, actual: u64 },
    FeederShareMismatch { cached: Money, actual: Money },
    NextHopMismatch { order: OrderId, cached: u32, actual: u64 },
    /// The ledger holds a handle the arena no longer knows.
    StaleHandle(UnitId),
    ZeroCountUnit(UnitId),
    OversizedUnit { unit: UnitId, count: u32 },
    /// A unit appears in more than one ledger, or twice in one.
    SharedUnit(UnitId),
    /// A live unit no ledger holds.
    LeakedUnit(UnitId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheViolation {
    pub site: LedgerSite,
    pub kind: ViolationKind,
}

impl CacheViolation {
    fn detached(kind: ViolationKind) -> Self {
        Self {
            site: LedgerSite::Detached,
            kind,
        }
    }

    fn at(self, site: LedgerSite) -> Self {
        Self { site, ..self }
    }
}

// ---------------------------------------------------------------------------
// Ledger audits
// ---------------------------------------------------------------------------

/// Check the base aggregates (count, weighted age) and every unit handle.
pub fn audit_ledger<C: LedgerCache>(ledger: &CargoLedger<C>, arena: &CargoArena) -> Vec<CacheViolation> {
    let mut violations = Vec::new();
    let mut count = 0u64;
    let mut days = 0u64;

    for &id in ledger.unit_ids() {
        let Some(unit) = arena.get(id) else {
            violations.push(CacheViolation::detached(ViolationKind::StaleHandle(id)));
            continue;
        };
        if unit.count() == 0 {
            violations.push(CacheViolation::detached(ViolationKind::ZeroCountUnit(id)));
        }
        if unit.count() > MAX_UNIT_COUNT {
            violations.push(CacheViolation::detached(ViolationKind::OversizedUnit {
                unit: id,
                count: unit.count(),
            }));
        }
        count += u64::from(unit.count());
        days += u64::from(unit.count()) * u64::from(unit.days_in_transit());
    }

    if u64::from(ledger.count()) != count {
        violations.push(CacheViolation::detached(ViolationKind::CountMismatch {
            cached: ledger.count(),
            actual: count,
        }));
    }
    if ledger.days_in_transit_weighted() != days {
        violations.push(CacheViolation::detached(ViolationKind::DaysWeightedMismatch {
            cached: ledger.days_in_transit_weighted(),
            actual: days,
        }));
    }
    violations
}

/// [`audit_ledger`] plus the feeder-share total.
pub fn audit_vehicle(ledger: &VehicleCargoLedger, arena: &CargoArena) -> Vec<CacheViolation> {
    let mut violations = audit_ledger(ledger, arena);
    let actual: Money = ledger
        .unit_ids()
        .iter()
        .filter_map(|&id| arena.get(id))
        .map(|unit| unit.feeder_share())
        .sum();
    if ledger.feeder_share() != actual {
        violations.push(CacheViolation::detached(ViolationKind::FeederShareMismatch {
            cached: ledger.feeder_share(),
            actual,
        }));
    }
    violations
}

/// [`audit_ledger`] plus the next-hop histogram, in both directions.
pub fn audit_station(ledger: &StationCargoLedger, arena: &CargoArena) -> Vec<CacheViolation> {
    let mut violations = audit_ledger(ledger, arena);

    let mut actual: BTreeMap<OrderId, u64> = BTreeMap::new();
    for unit in ledger.unit_ids().iter().filter_map(|&id| arena.get(id)) {
        if let Some(order) = unit.next_hop() {
            *actual.entry(order).or_insert(0) += u64::from(unit.count());
        }
    }

    let mut orders: BTreeSet<OrderId> = actual.keys().copied().collect();
    orders.extend(ledger.next_hops().keys().copied());
    for order in orders {
        let cached = ledger.next_hops().get(&order).copied();
        let real = actual.get(&order).copied().unwrap_or(0);
        // A zero entry must be pruned, not kept.
        if cached.map(u64::from) != Some(real) || cached == Some(0) {
            violations.push(CacheViolation::detached(ViolationKind::NextHopMismatch {
                order,
                cached: cached.unwrap_or(0),
                actual: real,
            }));
        }
    }
    violations
}

// ---------------------------------------------------------------------------
// Network audit
// ---------------------------------------------------------------------------

/// Audit every ledger in the network and check that each live unit is held
/// by exactly one ledger.
pub fn audit_network(network: &CargoNetwork) -> Vec<CacheViolation> {
    let arena = network.arena();
    let mut violations = Vec::new();
    let mut owners: SecondaryMap<UnitId, u32> = SecondaryMap::new();

    for (station_id, station) in network.stations() {
        for (cargo, ledger) in station.ledgers() {
            let site = LedgerSite::Station(station_id, cargo);
            violations.extend(audit_station(ledger, arena).into_iter().map(|v| v.at(site)));
            count_owners(&mut owners, ledger.unit_ids());
        }
    }
    for (vehicle_id, vehicle) in network.vehicles() {
        for (cargo, ledger) in vehicle.ledgers() {
            let site = LedgerSite::Vehicle(vehicle_id, cargo);
            violations.extend(audit_vehicle(ledger, arena).into_iter().map(|v| v.at(site)));
            count_owners(&mut owners, ledger.unit_ids());
        }
    }

    for (id, _) in arena.iter() {
        let kind = match owners.get(id).copied().unwrap_or(0) {
            0 => ViolationKind::LeakedUnit(id),
            1 => continue,
            _ => ViolationKind::SharedUnit(id),
        };
        violations.push(CacheViolation {
            site: LedgerSite::Arena,
            kind,
        });
    }
    violations
}

fn count_owners(owners: &mut SecondaryMap<UnitId, u32>, ids: &[UnitId]) {
    for &id in ids {
        if let Some(count) = owners.get_mut(id) {
            *count += 1;
        } else {
            owners.insert(id, 1);
        }
    }
}
