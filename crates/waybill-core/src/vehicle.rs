//! Cargo carried by a vehicle.

use crate::arena::CargoArena;
use crate::fixed::Money;
use crate::ledger::{CargoLedger, LedgerCache};
use crate::unit::CargoUnit;

/// Feeder share aggregate of a vehicle ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleCache {
    feeder_share: Money,
}

impl LedgerCache for VehicleCache {
    fn add_to_cache(&mut self, unit: &CargoUnit) {
        self.feeder_share += unit.feeder_share;
    }

    fn remove_from_cache(&mut self, unit: &CargoUnit) {
        self.feeder_share -= unit.feeder_share;
    }

    fn clear(&mut self) {
        self.feeder_share = 0;
    }
}

/// A ledger aboard a vehicle.
pub type VehicleCargoLedger = CargoLedger<VehicleCache>;

impl CargoLedger<VehicleCache> {
    /// Total feeder share owed to earlier carriers of this cargo.
    pub fn feeder_share(&self) -> Money {
        self.cache.feeder_share
    }

    /// Advance every unit by one day in transit.
    ///
    /// Counts do not change, so the weighted-age aggregate is bumped directly
    /// instead of rebracketing each unit. Saturated units contribute nothing.
    pub fn age_cargo(&mut self, arena: &mut CargoArena) {
        let mut delta = 0u64;
        for &id in self.unit_ids() {
            let unit = arena.unit_mut(id);
            if unit.age() {
                delta += u64::from(unit.count);
            }
        }
        self.bump_days_weighted(delta);
    }

    /// Forget the next unload station of every unit. Used when the vehicle's
    /// itinerary changes.
    pub fn invalidate_next_station(&mut self, arena: &mut CargoArena) {
        for &id in self.unit_ids() {
            arena.unit_mut(id).next_station = None;
        }
    }
}
