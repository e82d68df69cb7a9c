//! The cargo network: owns the arena, every station and vehicle ledger, the
//! event bus and the tick counter.
//!
//! # Architecture
//!
//! A [`CargoNetwork`] holds:
//! - one [`CargoArena`] shared by all ledgers
//! - stations, each with one [`StationCargoLedger`] per cargo type
//! - vehicles, each with one [`VehicleCargoLedger`] per cargo type
//! - an [`EventBus`] for cargo events
//!
//! Ledgers are created lazily the first time a cargo type shows up. Maps are
//! `BTreeMap`s so every walk over stations, vehicles and cargo types happens
//! in id order.
//!
//! # Tick
//!
//! Each [`tick`](CargoNetwork::tick):
//! 1. advances the tick counter
//! 2. re-routes up to `rescan_window` units in every station ledger
//! 3. on day boundaries, ages all vehicle cargo

use crate::arena::{ArenaError, CargoArena};
use crate::config::{ConfigError, LedgerConfig};
use crate::event::{DropReason, Event, EventBus, EventKind, PassiveListener};
use crate::fixed::Ticks;
use crate::id::{CargoTypeId, OrderId, SourceId, StationId, TileIndex, VehicleId};
use crate::ledger::{LedgerError, TransferContext, TransferMode, TransferResult};
use crate::payment::{NoPayment, PaymentSink};
use crate::routing::RoutingOracle;
use crate::station::{HintTarget, StationCargoLedger};
use crate::unit::{CargoUnit, Destination, Origin, SourceKind};
use crate::validation::CacheViolation;
use crate::vehicle::VehicleCargoLedger;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("unknown station {0:?}")]
    UnknownStation(StationId),
    #[error("unknown vehicle {0:?}")]
    UnknownVehicle(VehicleId),
    #[error("station {0:?} already exists")]
    DuplicateStation(StationId),
    #[error("vehicle {0:?} already exists")]
    DuplicateVehicle(VehicleId),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Owners
// ---------------------------------------------------------------------------

/// A station and the cargo waiting there.
#[derive(Debug, Clone)]
pub struct Station {
    pub(crate) tile: TileIndex,
    pub(crate) ledgers: BTreeMap<CargoTypeId, StationCargoLedger>,
}

impl Station {
    pub fn tile(&self) -> TileIndex {
        self.tile
    }

    pub fn ledger(&self, cargo: CargoTypeId) -> Option<&StationCargoLedger> {
        self.ledgers.get(&cargo)
    }

    pub fn ledgers(&self) -> impl Iterator<Item = (CargoTypeId, &StationCargoLedger)> {
        self.ledgers.iter().map(|(&cargo, ledger)| (cargo, ledger))
    }
}

/// A vehicle and the cargo aboard.
#[derive(Debug, Clone, Default)]
pub struct Vehicle {
    pub(crate) ledgers: BTreeMap<CargoTypeId, VehicleCargoLedger>,
}

impl Vehicle {
    pub fn ledger(&self, cargo: CargoTypeId) -> Option<&VehicleCargoLedger> {
        self.ledgers.get(&cargo)
    }

    pub fn ledgers(&self) -> impl Iterator<Item = (CargoTypeId, &VehicleCargoLedger)> {
        self.ledgers.iter().map(|(&cargo, ledger)| (cargo, ledger))
    }
}

/// New cargo handed to a station by its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Production {
    pub kind: SourceKind,
    pub source: SourceId,
    pub count: u32,
    pub destination: Option<Destination>,
}

/// What one [`CargoNetwork::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: Ticks,
    pub rerouted: usize,
    pub dropped: u32,
    /// A day boundary was crossed and vehicle cargo aged.
    pub aged: bool,
}

// ---------------------------------------------------------------------------
// CargoNetwork
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CargoNetwork {
    pub(crate) arena: CargoArena,
    pub(crate) stations: BTreeMap<StationId, Station>,
    pub(crate) vehicles: BTreeMap<VehicleId, Vehicle>,
    pub(crate) events: EventBus,
    pub(crate) config: LedgerConfig,
    pub(crate) tick: Ticks,
}

impl Default for CargoNetwork {
    fn default() -> Self {
        Self::with_valid_config(LedgerConfig::default())
    }
}

impl CargoNetwork {
    pub fn new(config: LedgerConfig) -> Result<Self, NetworkError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    pub(crate) fn with_valid_config(config: LedgerConfig) -> Self {
        Self {
            arena: CargoArena::new(config.arena_capacity),
            stations: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            events: EventBus::new(config.event_buffer_capacity),
            config,
            tick: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Stations and vehicles
    // -----------------------------------------------------------------------

    pub fn add_station(&mut self, id: StationId, tile: TileIndex) -> Result<(), NetworkError> {
        if self.stations.contains_key(&id) {
            return Err(NetworkError::DuplicateStation(id));
        }
        self.stations.insert(
            id,
            Station {
                tile,
                ledgers: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Remove a station, destroying all cargo waiting there. Hints at other
    /// stations that unload here are cleared. Returns the items destroyed.
    pub fn remove_station(&mut self, id: StationId) -> Result<u32, NetworkError> {
        let mut station = self
            .stations
            .remove(&id)
            .ok_or(NetworkError::UnknownStation(id))?;
        let mut destroyed = 0;
        for (cargo, ledger) in station.ledgers.iter_mut() {
            let count = ledger.clear(&mut self.arena);
            self.emit_dropped(Some(id), *cargo, count, DropReason::OwnerRemoved);
            destroyed += count;
        }
        self.invalidate_hints(HintTarget::Station(id));
        tracing::debug!(station = ?id, destroyed, "station removed");
        Ok(destroyed)
    }

    pub fn add_vehicle(&mut self, id: VehicleId) -> Result<(), NetworkError> {
        if self.vehicles.contains_key(&id) {
            return Err(NetworkError::DuplicateVehicle(id));
        }
        self.vehicles.insert(id, Vehicle::default());
        Ok(())
    }

    /// Remove a vehicle, destroying its cargo. Returns the items destroyed.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Result<u32, NetworkError> {
        let mut vehicle = self
            .vehicles
            .remove(&id)
            .ok_or(NetworkError::UnknownVehicle(id))?;
        let mut destroyed = 0;
        for (cargo, ledger) in vehicle.ledgers.iter_mut() {
            let count = ledger.clear(&mut self.arena);
            self.emit_dropped(None, *cargo, count, DropReason::OwnerRemoved);
            destroyed += count;
        }
        tracing::debug!(vehicle = ?id, destroyed, "vehicle removed");
        Ok(destroyed)
    }

    // -----------------------------------------------------------------------
    // Cargo flow
    // -----------------------------------------------------------------------

    /// Hand new cargo to a station.
    ///
    /// Amounts above the unit size limit become several units. Arena
    /// capacity and the ledger's count headroom are checked for all of them
    /// up front, so on error nothing is created.
    pub fn produce_cargo(
        &mut self,
        station_id: StationId,
        cargo: CargoTypeId,
        production: Production,
    ) -> Result<u32, NetworkError> {
        let station = self
            .stations
            .get_mut(&station_id)
            .ok_or(NetworkError::UnknownStation(station_id))?;
        if production.count == 0 {
            return Ok(0);
        }

        let max = self.config.max_unit_count;
        let chunks = production.count.div_ceil(max) as usize;
        if !self.arena.can_allocate(chunks) {
            let err = ArenaError::Exhausted {
                capacity: self.arena.capacity(),
            };
            tracing::warn!(station = ?station_id, ?cargo, count = production.count, "cargo production refused: {err}");
            return Err(err.into());
        }

        let held = station.ledger(cargo).map_or(0, |l| l.count());
        if production.count > u32::MAX - held {
            let err = LedgerError::CountOverflow {
                held,
                incoming: production.count,
            };
            tracing::warn!(station = ?station_id, ?cargo, "cargo production refused: {err}");
            return Err(err.into());
        }

        let origin = Origin {
            station: station_id,
            tile: station.tile,
            kind: production.kind,
            id: production.source,
        };
        let ledger = station
            .ledgers
            .entry(cargo)
            .or_insert_with(|| StationCargoLedger::with_max_unit_count(max));
        let mut remaining = production.count;
        while remaining > 0 {
            let count = remaining.min(max);
            let id = self
                .arena
                .allocate(CargoUnit::new(origin, count, production.destination))?;
            ledger.append(&mut self.arena, id)?;
            remaining -= count;
        }

        self.events.emit(Event::CargoProduced {
            station: station_id,
            cargo,
            count: production.count,
            tick: self.tick,
        });
        Ok(production.count)
    }

    /// Load up to `capacity` items of `cargo` from a station into a vehicle
    /// serving `order`.
    pub fn load(
        &mut self,
        vehicle_id: VehicleId,
        station_id: StationId,
        cargo: CargoTypeId,
        capacity: u32,
        order: Option<OrderId>,
        oracle: &dyn RoutingOracle,
    ) -> Result<TransferResult, NetworkError> {
        let max = self.config.max_unit_count;
        let station = self
            .stations
            .get_mut(&station_id)
            .ok_or(NetworkError::UnknownStation(station_id))?;
        let vehicle = self
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(NetworkError::UnknownVehicle(vehicle_id))?;

        let Some(source) = station.ledgers.get_mut(&cargo) else {
            return Ok(TransferResult::default());
        };
        let dest = vehicle
            .ledgers
            .entry(cargo)
            .or_insert_with(|| VehicleCargoLedger::with_max_unit_count(max));

        let mut payment = NoPayment;
        let mut ctx = TransferContext {
            oracle,
            payment: &mut payment,
            station: station_id,
            station_tile: station.tile,
            cargo,
            order,
        };
        let result = source.transfer(&mut self.arena, dest, capacity, TransferMode::CargoLoad, &mut ctx);

        if result.moved > 0 {
            self.events.emit(Event::CargoLoaded {
                vehicle: vehicle_id,
                station: station_id,
                cargo,
                count: result.moved,
                tick: self.tick,
            });
        }
        self.emit_transfer_failures(vehicle_id, station_id, cargo, &result);
        Ok(result)
    }

    /// Unload a vehicle's `cargo` at a station.
    ///
    /// `mode` is the station's unloading policy: `FinalDelivery` for normal
    /// unloading, `Transfer` or `Unload` for forced transfers, `NoAction` to
    /// move only routed cargo. Routing may still turn individual units into
    /// deliveries or transfers. `order` is the order the vehicle continues
    /// with; cargo whose next hop is that order stays aboard.
    #[allow(clippy::too_many_arguments)]
    pub fn unload(
        &mut self,
        vehicle_id: VehicleId,
        station_id: StationId,
        cargo: CargoTypeId,
        mode: TransferMode,
        order: Option<OrderId>,
        oracle: &dyn RoutingOracle,
        payment: &mut dyn PaymentSink,
    ) -> Result<TransferResult, NetworkError> {
        let max = self.config.max_unit_count;
        let station = self
            .stations
            .get_mut(&station_id)
            .ok_or(NetworkError::UnknownStation(station_id))?;
        let vehicle = self
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(NetworkError::UnknownVehicle(vehicle_id))?;

        let Some(source) = vehicle.ledgers.get_mut(&cargo) else {
            return Ok(TransferResult::default());
        };
        let dest = station
            .ledgers
            .entry(cargo)
            .or_insert_with(|| StationCargoLedger::with_max_unit_count(max));

        let mut ctx = TransferContext {
            oracle,
            payment,
            station: station_id,
            station_tile: station.tile,
            cargo,
            order,
        };
        let max_move = source.count();
        let result = source.transfer(&mut self.arena, dest, max_move, mode, &mut ctx);

        if result.delivered > 0 {
            self.events.emit(Event::CargoDelivered {
                vehicle: vehicle_id,
                station: station_id,
                cargo,
                count: result.delivered,
                tick: self.tick,
            });
        }
        if result.transferred > 0 {
            self.events.emit(Event::CargoTransferred {
                vehicle: vehicle_id,
                station: station_id,
                cargo,
                count: result.transferred,
                feeder_share: result.feeder_share_paid,
                tick: self.tick,
            });
        }
        self.emit_transfer_failures(vehicle_id, station_id, cargo, &result);
        Ok(result)
    }

    /// Destroy waiting cargo from the front until at most `max_remaining`
    /// items are left. Returns the items destroyed.
    pub fn truncate_station(
        &mut self,
        station_id: StationId,
        cargo: CargoTypeId,
        max_remaining: u32,
    ) -> Result<u32, NetworkError> {
        let station = self
            .stations
            .get_mut(&station_id)
            .ok_or(NetworkError::UnknownStation(station_id))?;
        let Some(ledger) = station.ledgers.get_mut(&cargo) else {
            return Ok(0);
        };
        let removed = ledger.truncate(&mut self.arena, max_remaining);
        self.emit_dropped(Some(station_id), cargo, removed, DropReason::Truncated);
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Routing invalidation
    // -----------------------------------------------------------------------

    /// Clear station hints that leave via an order or unload at a station,
    /// across all stations and cargo types. Returns the units touched.
    pub fn invalidate_hints(&mut self, target: HintTarget) -> usize {
        let mut touched = 0;
        for station in self.stations.values_mut() {
            for ledger in station.ledgers.values_mut() {
                touched += ledger.clear_hints_to(&mut self.arena, target);
            }
        }
        touched
    }

    /// Clear station hints of cargo headed for a destination entity, across
    /// all stations and cargo types. Returns the units touched.
    pub fn invalidate_destination(&mut self, kind: SourceKind, id: SourceId) -> usize {
        let mut touched = 0;
        for station in self.stations.values_mut() {
            for ledger in station.ledgers.values_mut() {
                touched += ledger.clear_hints_for_destination(&mut self.arena, kind, id);
            }
        }
        touched
    }

    /// Forget the next unload station of everything aboard a vehicle whose
    /// orders changed.
    pub fn invalidate_vehicle_itinerary(&mut self, vehicle_id: VehicleId) -> Result<(), NetworkError> {
        let vehicle = self
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(NetworkError::UnknownVehicle(vehicle_id))?;
        for ledger in vehicle.ledgers.values_mut() {
            ledger.invalidate_next_station(&mut self.arena);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick(&mut self, oracle: &dyn RoutingOracle) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let window = self.config.rescan_window;
        let mut drops = Vec::new();
        for (&station_id, station) in self.stations.iter_mut() {
            for (&cargo, ledger) in station.ledgers.iter_mut() {
                let rescan = ledger.periodic_rescan(&mut self.arena, oracle, station_id, cargo, window);
                report.rerouted += rescan.rerouted;
                report.dropped += rescan.dropped;
                if rescan.dropped > 0 {
                    drops.push((station_id, cargo, rescan.dropped));
                }
            }
        }
        for (station_id, cargo, count) in drops {
            self.emit_dropped(Some(station_id), cargo, count, DropReason::Unreachable);
        }

        if self.tick % self.config.day_length_ticks == 0 {
            for vehicle in self.vehicles.values_mut() {
                for ledger in vehicle.ledgers.values_mut() {
                    ledger.age_cargo(&mut self.arena);
                }
            }
            report.aged = true;
            self.events.emit(Event::CargoAged {
                vehicles: self.vehicles.len() as u32,
                tick: self.tick,
            });
        }
        report
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.events.on_passive(kind, listener);
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.events.suppress(kind);
    }

    /// Hand buffered events to listeners.
    pub fn deliver_events(&mut self) {
        self.events.deliver();
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    fn emit_dropped(&mut self, station: Option<StationId>, cargo: CargoTypeId, count: u32, reason: DropReason) {
        if count == 0 {
            return;
        }
        self.events.emit(Event::CargoDropped {
            station,
            cargo,
            count,
            reason,
            tick: self.tick,
        });
    }

    fn emit_transfer_failures(
        &mut self,
        vehicle: VehicleId,
        station: StationId,
        cargo: CargoTypeId,
        result: &TransferResult,
    ) {
        self.emit_dropped(Some(station), cargo, result.dropped, DropReason::Unreachable);
        if result.allocation_failed {
            self.events.emit(Event::TransferAborted {
                vehicle,
                station,
                cargo,
                tick: self.tick,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn arena(&self) -> &CargoArena {
        &self.arena
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Ticks {
        self.tick
    }

    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.get(&id)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn stations(&self) -> impl Iterator<Item = (StationId, &Station)> {
        self.stations.iter().map(|(&id, station)| (id, station))
    }

    pub fn vehicles(&self) -> impl Iterator<Item = (VehicleId, &Vehicle)> {
        self.vehicles.iter().map(|(&id, vehicle)| (id, vehicle))
    }

    pub fn station_ledger(&self, station: StationId, cargo: CargoTypeId) -> Option<&StationCargoLedger> {
        self.stations.get(&station)?.ledgers.get(&cargo)
    }

    pub fn vehicle_ledger(&self, vehicle: VehicleId, cargo: CargoTypeId) -> Option<&VehicleCargoLedger> {
        self.vehicles.get(&vehicle)?.ledgers.get(&cargo)
    }

    /// Items of `cargo` waiting at a station. Zero for unknown stations.
    pub fn waiting(&self, station: StationId, cargo: CargoTypeId) -> u32 {
        self.station_ledger(station, cargo).map_or(0, |l| l.count())
    }

    /// Items of `cargo` aboard a vehicle. Zero for unknown vehicles.
    pub fn aboard(&self, vehicle: VehicleId, cargo: CargoTypeId) -> u32 {
        self.vehicle_ledger(vehicle, cargo).map_or(0, |l| l.count())
    }

    /// Every item held anywhere in the network.
    pub fn total_cargo(&self) -> u64 {
        let at_stations = self
            .stations
            .values()
            .flat_map(|s| s.ledgers.values())
            .map(|l| u64::from(l.count()));
        let aboard = self
            .vehicles
            .values()
            .flat_map(|v| v.ledgers.values())
            .map(|l| u64::from(l.count()));
        at_stations.chain(aboard).sum()
    }

    /// Check every cached aggregate and unit ownership. Empty when consistent.
    pub fn audit(&self) -> Vec<CacheViolation> {
        crate::validation::audit_network(self)
    }
}
