//! Property-based tests for the cargo ledgers.
//!
//! Random ledgers are pushed through random transfers, rescans and
//! invalidations, and the accounting invariants are checked after each step.

use proptest::prelude::*;
use waybill_core::arena::CargoArena;
use waybill_core::id::*;
use waybill_core::ledger::{CargoLedger, LedgerCache, TransferContext, TransferMode};
use waybill_core::network::{CargoNetwork, Production};
use waybill_core::routing::RouteQuery;
use waybill_core::station::{HintTarget, StationCargoLedger};
use waybill_core::test_utils::*;
use waybill_core::unit::{CargoUnit, SourceKind};
use waybill_core::validation::{audit_station, audit_vehicle};
use waybill_core::vehicle::VehicleCargoLedger;

// ===========================================================================
// Generators
// ===========================================================================

/// `(count, destination, hinted order)` of one unit.
type UnitSpec = (u32, Option<u32>, Option<u32>);

fn arb_units(max: usize) -> impl Strategy<Value = Vec<UnitSpec>> {
    proptest::collection::vec(
        (1..200u32, proptest::option::of(0..4u32), proptest::option::of(1..3u32)),
        1..max,
    )
}

fn arb_unload_mode() -> impl Strategy<Value = TransferMode> {
    prop_oneof![
        Just(TransferMode::FinalDelivery),
        Just(TransferMode::Transfer),
        Just(TransferMode::Unload),
        Just(TransferMode::NoAction),
    ]
}

/// Destination 0 is unreachable, 1 is the final hop, 2 and 3 continue via
/// orders 1 and 2.
fn table_oracle(_station: StationId, _cargo: CargoTypeId, unit: &CargoUnit, _order: Option<OrderId>) -> RouteQuery {
    match unit.destination().map(|d| d.tile.0) {
        Some(0) => RouteQuery::unreachable(),
        Some(2) => RouteQuery::via(OrderId(1), station_c()),
        Some(3) => RouteQuery::via(OrderId(2), station_c()),
        _ => RouteQuery::final_hop(),
    }
}

fn build_unit(spec: &UnitSpec) -> CargoUnit {
    let (count, dest_n, hint) = *spec;
    let unit = match dest_n {
        Some(n) => routed_unit(count, n),
        None => plain_unit(count),
    };
    unit.with_next_hop(hint.map(OrderId), None)
}

fn fill<C: LedgerCache>(ledger: &mut CargoLedger<C>, arena: &mut CargoArena, specs: &[UnitSpec]) {
    for spec in specs {
        let id = arena.allocate(build_unit(spec)).unwrap();
        ledger.append(arena, id).unwrap();
    }
}

fn context<'a>(
    payment: &'a mut RecordingPayment,
    station: StationId,
    order: Option<OrderId>,
) -> TransferContext<'a> {
    TransferContext {
        oracle: &table_oracle,
        payment,
        station,
        station_tile: TileIndex(station.0 * 100),
        cargo: coal(),
        order,
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Loading never moves more than requested and never creates or loses
    /// cargo: what leaves the station is either aboard or dropped.
    #[test]
    fn load_conserves_cargo(
        units in arb_units(20),
        max_move in 0..2000u32,
        order in proptest::option::of(1..3u32),
    ) {
        let mut arena = CargoArena::new(256);
        let mut station = StationCargoLedger::new();
        let mut vehicle = VehicleCargoLedger::new();
        fill(&mut station, &mut arena, &units);
        let before = station.count();

        let mut payment = RecordingPayment::new(1);
        let mut ctx = context(&mut payment, station_a(), order.map(OrderId));
        let result = station.transfer(&mut arena, &mut vehicle, max_move, TransferMode::CargoLoad, &mut ctx);

        prop_assert!(result.moved <= max_move);
        prop_assert_eq!(result.delivered, 0);
        prop_assert_eq!(before, station.count() + vehicle.count() + result.dropped);
        prop_assert_eq!(vehicle.count(), result.moved);
        prop_assert!(payment.final_deliveries.is_empty());
        prop_assert!(audit_station(&station, &arena).is_empty());
        prop_assert!(audit_vehicle(&vehicle, &arena).is_empty());
    }

    /// Unloading conserves cargo across the vehicle, the station,
    /// deliveries and drops, and pays each moved quantity exactly once.
    #[test]
    fn unload_conserves_cargo(
        units in arb_units(20),
        mode in arb_unload_mode(),
        max_move in 0..2000u32,
        order in proptest::option::of(1..3u32),
    ) {
        let mut arena = CargoArena::new(256);
        let mut vehicle = VehicleCargoLedger::new();
        let mut station = StationCargoLedger::new();
        fill(&mut vehicle, &mut arena, &units);
        let before = vehicle.count();

        let mut payment = RecordingPayment::new(2);
        let mut ctx = context(&mut payment, station_b(), order.map(OrderId));
        let result = vehicle.transfer(&mut arena, &mut station, max_move, mode, &mut ctx);

        prop_assert!(result.moved <= max_move);
        prop_assert_eq!(before, vehicle.count() + station.count() + result.delivered + result.dropped);
        prop_assert_eq!(payment.delivered(), result.delivered);
        prop_assert_eq!(payment.transferred(), result.transferred);
        prop_assert!(result.delivered + result.transferred <= result.moved);
        prop_assert!(audit_vehicle(&vehicle, &arena).is_empty());
        prop_assert!(audit_station(&station, &arena).is_empty());
    }

    /// Splitting and merging back restores the unit exactly.
    #[test]
    fn split_merge_round_trip(count in 2..5000u32, share in 0..100_000i64, at in 1..5000u32) {
        let at = 1 + at % (count - 1);
        let mut arena = CargoArena::new(4);
        let original = plain_unit(count).with_history(9, share);
        let id = arena.allocate(original.clone()).unwrap();
        let part = arena.split(id, at).unwrap();

        let (kept, split) = (arena.get(id).unwrap(), arena.get(part).unwrap());
        prop_assert_eq!(kept.count() + split.count(), count);
        prop_assert_eq!(kept.feeder_share() + split.feeder_share(), share);
        prop_assert_eq!(split.feeder_share(), share * i64::from(at) / i64::from(count));

        arena.merge(id, part).unwrap();
        prop_assert_eq!(arena.get(id).unwrap(), &original);
    }

    /// The next-hop histogram matches the units after any mix of rescans,
    /// invalidations and truncations.
    #[test]
    fn histogram_stays_exact(
        units in arb_units(30),
        ops in proptest::collection::vec(0..4u8, 1..12),
        window in 1..10usize,
    ) {
        let mut arena = CargoArena::new(256);
        let mut station = StationCargoLedger::new();
        fill(&mut station, &mut arena, &units);

        for op in ops {
            match op {
                0 => {
                    station.periodic_rescan(&mut arena, &table_oracle, station_a(), coal(), window);
                }
                1 => {
                    station.clear_hints_to(&mut arena, HintTarget::Order(OrderId(1)));
                }
                2 => {
                    let d = dest(2);
                    station.clear_hints_for_destination(&mut arena, d.kind, d.id);
                }
                _ => {
                    let keep = station.count() / 2;
                    station.truncate(&mut arena, keep);
                }
            }
            prop_assert!(audit_station(&station, &arena).is_empty());
            let hinted: u32 = station
                .iter(&arena)
                .filter(|u| u.next_hop().is_some())
                .map(|u| u.count())
                .sum();
            prop_assert_eq!(station.next_hops().values().sum::<u32>(), hinted);
        }
    }

    /// Two networks fed the same operations end in byte-identical snapshots.
    #[test]
    fn network_is_deterministic(
        amounts in proptest::collection::vec((1..500u32, proptest::option::of(1..4u32)), 1..10),
        capacity in 1..600u32,
    ) {
        let run = || {
            let mut net = CargoNetwork::default();
            net.add_station(station_a(), TileIndex(100)).unwrap();
            net.add_station(station_b(), TileIndex(200)).unwrap();
            net.add_vehicle(VehicleId(1)).unwrap();
            for &(count, dest_n) in &amounts {
                net.produce_cargo(station_a(), coal(), Production {
                    kind: SourceKind::Town,
                    source: SourceId(4),
                    count,
                    destination: dest_n.map(dest),
                }).unwrap();
                net.tick(&table_oracle);
            }
            net.load(VehicleId(1), station_a(), coal(), capacity, Some(OrderId(1)), &table_oracle).unwrap();
            let mut payment = RecordingPayment::new(1);
            net.unload(
                VehicleId(1),
                station_b(),
                coal(),
                TransferMode::FinalDelivery,
                None,
                &table_oracle,
                &mut payment,
            ).unwrap();
            net
        };

        let (a, b) = (run(), run());
        prop_assert!(a.audit().is_empty());
        prop_assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
    }
}
