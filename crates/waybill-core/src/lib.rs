//! Waybill Core -- the cargo packet ledger for transport simulations.
//!
//! This crate tracks discrete units of cargo in transit, the containers that
//! hold them on vehicles and at stations, and the algorithm that moves cargo
//! between containers while keeping exact accounting of count, age and
//! payment share.
//!
//! # Ownership Model
//!
//! Every [`unit::CargoUnit`] lives in one bounded [`arena::CargoArena`] and
//! is referenced by exactly one ledger through a [`id::UnitId`] handle. The
//! arena is passed to ledger operations explicitly; there is no global pool.
//!
//! ```rust,ignore
//! let id = arena.allocate(unit)?;
//! station_ledger.append(&mut arena, id)?;
//! let result = station_ledger.transfer(&mut arena, &mut vehicle_ledger, 40, TransferMode::CargoLoad, &mut ctx);
//! ```
//!
//! # Key Types
//!
//! - [`ledger::CargoLedger`] -- Ordered unit list with cached aggregates and
//!   the transfer state machine.
//! - [`vehicle::VehicleCargoLedger`] -- Adds feeder share and daily aging.
//! - [`station::StationCargoLedger`] -- Adds a next-hop histogram and
//!   amortised re-routing.
//! - [`routing::RoutingOracle`] / [`payment::PaymentSink`] -- The two
//!   collaborators a transfer calls out to.
//! - [`network::CargoNetwork`] -- Owns the arena, stations, vehicles and
//!   events, and drives the per-tick work.
//! - [`serialize`] -- Versioned snapshots via bitcode.

pub mod arena;
pub mod config;
pub mod event;
pub mod fixed;
pub mod id;
pub mod ledger;
pub mod network;
pub mod payment;
pub mod routing;
pub mod serialize;
pub mod station;
pub mod unit;
pub mod validation;
pub mod vehicle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
