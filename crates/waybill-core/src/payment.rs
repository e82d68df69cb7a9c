//! Payment callbacks invoked by the transfer algorithm.

use crate::fixed::Money;
use crate::unit::CargoUnit;

/// Receives payment events while cargo moves.
///
/// Each method is called at most once per moved quantity, with `count`
/// equal to the amount actually moved. That may be less than
/// `unit.count()` when only part of a unit moves.
pub trait PaymentSink {
    /// `count` items of `unit` reached their destination and are consumed.
    fn pay_final_delivery(&mut self, unit: &CargoUnit, count: u32);

    /// `count` items of `unit` changed carrier without being delivered.
    /// Returns the feeder share to credit to the moved cargo.
    fn pay_transfer(&mut self, unit: &CargoUnit, count: u32) -> Money;
}

/// A sink that pays nothing. Suitable for loading, where no payment applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPayment;

impl PaymentSink for NoPayment {
    fn pay_final_delivery(&mut self, _unit: &CargoUnit, _count: u32) {}

    fn pay_transfer(&mut self, _unit: &CargoUnit, _count: u32) -> Money {
        0
    }
}

/// Accumulates income for one vehicle's unloading session.
///
/// `price(unit, count)` supplies the value of moving `count` items of `unit`.
/// Final delivery books the full price as route profit; the part already
/// credited to earlier carriers as feeder share is subtracted from the
/// visible profit. Transfers credit the full price as feeder share.
pub struct PaymentTally<F>
where
    F: FnMut(&CargoUnit, u32) -> Money,
{
    price: F,
    /// Real income from completed deliveries.
    pub route_profit: Money,
    /// Income as shown to the carrier, net of earlier feeder shares plus
    /// transfer credits.
    pub visual_profit: Money,
    pub delivered: u32,
    pub transferred: u32,
}

impl<F> PaymentTally<F>
where
    F: FnMut(&CargoUnit, u32) -> Money,
{
    pub fn new(price: F) -> Self {
        Self {
            price,
            route_profit: 0,
            visual_profit: 0,
            delivered: 0,
            transferred: 0,
        }
    }
}

impl<F> std::fmt::Debug for PaymentTally<F>
where
    F: FnMut(&CargoUnit, u32) -> Money,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentTally")
            .field("route_profit", &self.route_profit)
            .field("visual_profit", &self.visual_profit)
            .field("delivered", &self.delivered)
            .field("transferred", &self.transferred)
            .finish_non_exhaustive()
    }
}

impl<F> PaymentSink for PaymentTally<F>
where
    F: FnMut(&CargoUnit, u32) -> Money,
{
    fn pay_final_delivery(&mut self, unit: &CargoUnit, count: u32) {
        let profit = (self.price)(unit, count);
        self.route_profit += profit;
        self.visual_profit += profit - unit.feeder_share_for(count);
        self.delivered += count;
    }

    fn pay_transfer(&mut self, unit: &CargoUnit, count: u32) -> Money {
        let share = (self.price)(unit, count);
        self.visual_profit += share;
        self.transferred += count;
        share
    }
}
