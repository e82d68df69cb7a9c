//! Binary snapshots of a cargo network via `bitcode`, with a versioned header.
//!
//! A snapshot stores the config, the tick and, for every ledger, its units
//! in ledger order. Cached aggregates are not stored: loading replays
//! [`CargoLedger::append`] for each unit and then rebuilds the aggregates
//! with [`CargoLedger::invalidate_cache`]. Units that became mergeable after
//! they were appended are merged on load.
//! The event bus holds closures and is recreated empty.

use crate::arena::{ArenaError, CargoArena};
use crate::config::{ConfigError, LedgerConfig};
use crate::fixed::Ticks;
use crate::id::{CargoTypeId, StationId, TileIndex, VehicleId};
use crate::ledger::{CargoLedger, LedgerCache, LedgerError};
use crate::network::{CargoNetwork, Station, Vehicle};
use crate::station::StationCargoLedger;
use crate::unit::CargoUnit;
use crate::vehicle::VehicleCargoLedger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a cargo network snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xCA60_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("snapshot config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("snapshot does not fit the cargo arena: {0}")]
    Arena(#[from] ArenaError),
    #[error("snapshot ledger rejected a unit: {0}")]
    Ledger(#[from] LedgerError),
    #[error("snapshot unit holds {count} items (allowed 1..={max})")]
    InvalidUnitCount { count: u32, max: u32 },
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Network tick at the time the snapshot was taken.
    pub tick: Ticks,
}

impl SnapshotHeader {
    pub fn new(tick: Ticks) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(SnapshotError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Decode a snapshot and return only its header.
///
/// bitcode has no partial decoding, so this decodes the whole payload.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, SnapshotError> {
    let snapshot: NetworkSnapshot =
        bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    cargo: CargoTypeId,
    /// Station ledgers only.
    rescan_cursor: u64,
    units: Vec<CargoUnit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StationRecord {
    id: StationId,
    tile: TileIndex,
    ledgers: Vec<LedgerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VehicleRecord {
    id: VehicleId,
    ledgers: Vec<LedgerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetworkSnapshot {
    header: SnapshotHeader,
    config: LedgerConfig,
    stations: Vec<StationRecord>,
    vehicles: Vec<VehicleRecord>,
}

fn record<C: LedgerCache>(
    cargo: CargoTypeId,
    ledger: &CargoLedger<C>,
    arena: &CargoArena,
    rescan_cursor: usize,
) -> LedgerRecord {
    LedgerRecord {
        cargo,
        rescan_cursor: rescan_cursor as u64,
        units: ledger.iter(arena).cloned().collect(),
    }
}

/// Rebuild a ledger by appending its units in saved order.
fn restore<C: LedgerCache>(
    units: Vec<CargoUnit>,
    arena: &mut CargoArena,
    max_unit_count: u32,
) -> Result<CargoLedger<C>, SnapshotError> {
    let mut ledger = CargoLedger::with_max_unit_count(max_unit_count);
    for unit in units {
        if unit.count() == 0 || unit.count() > max_unit_count {
            return Err(SnapshotError::InvalidUnitCount {
                count: unit.count(),
                max: max_unit_count,
            });
        }
        let id = arena.allocate(unit)?;
        ledger.append(arena, id)?;
    }
    ledger.invalidate_cache(arena);
    Ok(ledger)
}

// ---------------------------------------------------------------------------
// CargoNetwork serialization
// ---------------------------------------------------------------------------

impl CargoNetwork {
    /// Serialize all cargo to a binary blob. Events and listeners are not
    /// included.
    pub fn serialize(&self) -> Result<Vec<u8>, SnapshotError> {
        let stations = self
            .stations
            .iter()
            .map(|(&id, station)| StationRecord {
                id,
                tile: station.tile,
                ledgers: station
                    .ledgers
                    .iter()
                    .map(|(&cargo, ledger)| record(cargo, ledger, &self.arena, ledger.rescan_cursor()))
                    .collect(),
            })
            .collect();
        let vehicles = self
            .vehicles
            .iter()
            .map(|(&id, vehicle)| VehicleRecord {
                id,
                ledgers: vehicle
                    .ledgers
                    .iter()
                    .map(|(&cargo, ledger)| record(cargo, ledger, &self.arena, 0))
                    .collect(),
            })
            .collect();

        let snapshot = NetworkSnapshot {
            header: SnapshotHeader::new(self.tick),
            config: self.config.clone(),
            stations,
            vehicles,
        };
        bitcode::serialize(&snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Rebuild a network from a blob written by [`serialize`](Self::serialize).
    ///
    /// Unit order and unit boundaries round-trip exactly. Unit handles do
    /// not. Listeners must be re-registered.
    pub fn deserialize(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: NetworkSnapshot =
            bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.header.validate()?;
        snapshot.config.validate()?;

        let mut network = CargoNetwork::with_valid_config(snapshot.config);
        network.tick = snapshot.header.tick;
        let max = network.config.max_unit_count;

        for record in snapshot.stations {
            let mut ledgers = BTreeMap::new();
            for ledger in record.ledgers {
                let mut restored: StationCargoLedger = restore(ledger.units, &mut network.arena, max)?;
                restored.set_rescan_cursor(usize::try_from(ledger.rescan_cursor).unwrap_or(0));
                ledgers.insert(ledger.cargo, restored);
            }
            network.stations.insert(
                record.id,
                Station {
                    tile: record.tile,
                    ledgers,
                },
            );
        }
        for record in snapshot.vehicles {
            let mut ledgers = BTreeMap::new();
            for ledger in record.ledgers {
                let restored: VehicleCargoLedger = restore(ledger.units, &mut network.arena, max)?;
                ledgers.insert(ledger.cargo, restored);
            }
            network.vehicles.insert(record.id, Vehicle { ledgers });
        }

        tracing::debug!(
            tick = network.tick,
            units = network.arena.len(),
            "cargo network restored"
        );
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Production;
    use crate::routing::{DirectRouting, RouteQuery};
    use crate::test_utils::*;
    use crate::unit::SourceKind;

    fn populated() -> CargoNetwork {
        let mut net = CargoNetwork::default();
        net.add_station(station_a(), TileIndex(100)).unwrap();
        net.add_station(station_b(), TileIndex(200)).unwrap();
        net.add_vehicle(VehicleId(7)).unwrap();
        for (count, destination) in [(30, Some(dest(9))), (12, None)] {
            net.produce_cargo(
                station_a(),
                coal(),
                Production {
                    kind: SourceKind::Industry,
                    source: crate::id::SourceId(1),
                    count,
                    destination,
                },
            )
            .unwrap();
        }
        let oracle = ScriptedOracle::new().route(dest(9), RouteQuery::via(crate::id::OrderId(3), station_b()));
        net.tick(&oracle);
        net.load(VehicleId(7), station_a(), coal(), 5, None, &DirectRouting).unwrap();
        net
    }

    #[test]
    fn round_trip_preserves_ledgers() {
        let net = populated();
        let bytes = net.serialize().unwrap();
        let restored = CargoNetwork::deserialize(&bytes).unwrap();

        assert_eq!(restored.current_tick(), net.current_tick());
        assert_eq!(restored.total_cargo(), net.total_cargo());
        assert_eq!(restored.arena().len(), net.arena().len());
        let before = net.station_ledger(station_a(), coal()).unwrap();
        let after = restored.station_ledger(station_a(), coal()).unwrap();
        assert_eq!(after.next_hops(), before.next_hops());
        assert_eq!(after.rescan_cursor(), before.rescan_cursor());
        let units_before: Vec<&CargoUnit> = before.iter(net.arena()).collect();
        let units_after: Vec<&CargoUnit> = after.iter(restored.arena()).collect();
        assert_eq!(units_after, units_before);
        assert!(restored.audit().is_empty());
    }

    /// One station A ledger holding `units` with a saved cursor.
    fn station_snapshot(units: Vec<CargoUnit>, rescan_cursor: u64) -> Vec<u8> {
        let snapshot = NetworkSnapshot {
            header: SnapshotHeader::new(3),
            config: LedgerConfig::default(),
            stations: vec![StationRecord {
                id: station_a(),
                tile: TileIndex(100),
                ledgers: vec![LedgerRecord {
                    cargo: coal(),
                    rescan_cursor,
                    units,
                }],
            }],
            vehicles: Vec::new(),
        };
        bitcode::serialize(&snapshot).unwrap()
    }

    #[test]
    fn load_merges_mergeable_units() {
        let bytes = station_snapshot(
            vec![
                plain_unit(10).with_history(4, 30),
                plain_unit(6).with_history(9, 12),
                routed_unit(5, 2),
            ],
            0,
        );
        let net = CargoNetwork::deserialize(&bytes).unwrap();

        let ledger = net.station_ledger(station_a(), coal()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.count(), 21);
        let merged = ledger.iter(net.arena()).next().unwrap();
        assert_eq!(merged.count(), 16);
        assert_eq!(merged.feeder_share(), 42);
        assert_eq!(merged.days_in_transit(), 4);
        assert_eq!(ledger.days_in_transit_weighted(), 16 * 4);
        assert_eq!(net.arena().len(), 2);
        assert!(net.audit().is_empty());
    }

    #[test]
    fn load_rejects_zero_count_unit() {
        let mut empty = plain_unit(1);
        empty.count = 0;
        let bytes = station_snapshot(vec![plain_unit(3), empty], 0);
        assert!(matches!(
            CargoNetwork::deserialize(&bytes),
            Err(SnapshotError::InvalidUnitCount { count: 0, .. })
        ));
    }

    #[test]
    fn load_rejects_oversized_unit() {
        let max = LedgerConfig::default().max_unit_count;
        let bytes = station_snapshot(vec![plain_unit(max + 1)], 0);
        assert!(matches!(
            CargoNetwork::deserialize(&bytes),
            Err(SnapshotError::InvalidUnitCount { count, max: m }) if count == max + 1 && m == max
        ));
    }

    #[test]
    fn out_of_range_cursor_restarts_at_front() {
        let bytes = station_snapshot(vec![routed_unit(4, 1), routed_unit(4, 2)], 7);
        let net = CargoNetwork::deserialize(&bytes).unwrap();
        assert_eq!(net.station_ledger(station_a(), coal()).unwrap().rescan_cursor(), 0);

        let bytes = station_snapshot(vec![routed_unit(4, 1), routed_unit(4, 2)], 1);
        let net = CargoNetwork::deserialize(&bytes).unwrap();
        assert_eq!(net.station_ledger(station_a(), coal()).unwrap().rescan_cursor(), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let snapshot = NetworkSnapshot {
            header: SnapshotHeader {
                magic: 0xDEAD_BEEF,
                version: FORMAT_VERSION,
                tick: 0,
            },
            config: LedgerConfig::default(),
            stations: Vec::new(),
            vehicles: Vec::new(),
        };
        let bytes = bitcode::serialize(&snapshot).unwrap();
        assert!(matches!(
            CargoNetwork::deserialize(&bytes),
            Err(SnapshotError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn version_checks() {
        let mut header = SnapshotHeader::new(5);
        assert!(header.validate().is_ok());
        header.version = FORMAT_VERSION + 1;
        assert!(matches!(header.validate(), Err(SnapshotError::FutureVersion(_))));
        header.version = 0;
        assert!(matches!(header.validate(), Err(SnapshotError::UnsupportedVersion(0))));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            CargoNetwork::deserialize(&[1, 2, 3]),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[test]
    fn header_is_readable() {
        let net = populated();
        let bytes = net.serialize().unwrap();
        assert_eq!(read_snapshot_header(&bytes).unwrap(), SnapshotHeader::new(1));
    }

    #[test]
    fn snapshot_too_large_for_arena_fails() {
        let net = populated();
        let mut snapshot: NetworkSnapshot = bitcode::deserialize(&net.serialize().unwrap()).unwrap();
        snapshot.config.arena_capacity = 1;
        let bytes = bitcode::serialize(&snapshot).unwrap();
        assert!(matches!(
            CargoNetwork::deserialize(&bytes),
            Err(SnapshotError::Arena(ArenaError::Exhausted { capacity: 1 }))
        ));
    }
}
