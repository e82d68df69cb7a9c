//! Contract with the external routing oracle.
//!
//! The ledgers never compute routes. They ask a [`RoutingOracle`] for the
//! next hop of a unit and react to one of three answers: unreachable,
//! intermediate hop, or final hop.

use crate::id::{CargoTypeId, OrderId, StationId};
use crate::unit::CargoUnit;

/// A link out of the current station that brings cargo closer to its
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLink {
    /// The order that serves this link from the current station.
    pub origin_order: OrderId,
    /// The station at the far end of the link.
    pub next_station: StationId,
}

/// Raw oracle answer.
///
/// `found == false` means the destination can no longer be reached. A found
/// answer without a link means the cargo is at its final hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteQuery {
    pub link: Option<RouteLink>,
    /// Where the cargo should be unloaded next, if known.
    pub next_unload: Option<StationId>,
    pub found: bool,
}

/// Classified oracle answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteHop {
    Unreachable,
    /// The current station is the last stop before the destination.
    Final,
    Intermediate {
        link: RouteLink,
        next_unload: Option<StationId>,
    },
}

impl RouteQuery {
    pub fn unreachable() -> Self {
        Self {
            link: None,
            next_unload: None,
            found: false,
        }
    }

    pub fn final_hop() -> Self {
        Self {
            link: None,
            next_unload: None,
            found: true,
        }
    }

    /// Continue via `origin_order` towards `next_station`, unloading there.
    pub fn via(origin_order: OrderId, next_station: StationId) -> Self {
        Self {
            link: Some(RouteLink {
                origin_order,
                next_station,
            }),
            next_unload: Some(next_station),
            found: true,
        }
    }

    pub fn hop(&self) -> RouteHop {
        match (self.found, self.link) {
            (false, _) => RouteHop::Unreachable,
            (true, None) => RouteHop::Final,
            (true, Some(link)) => RouteHop::Intermediate {
                link,
                next_unload: self.next_unload,
            },
        }
    }

    /// The `(next_hop, next_station)` hint this answer implies.
    pub fn hint(&self) -> (Option<OrderId>, Option<StationId>) {
        match self.link {
            Some(link) => (Some(link.origin_order), self.next_unload.or(Some(link.next_station))),
            None => (None, self.next_unload),
        }
    }
}

/// Answers "what is the next hop for this unit from this station".
///
/// Called synchronously from inside ledger operations. Implementations must
/// be deterministic and free of side effects on the ledgers.
pub trait RoutingOracle {
    /// `cursor_order` is the order currently being served at `station`, if
    /// any. Returned links whose `origin_order` equals it continue on the
    /// same vehicle.
    fn find_route_link(
        &self,
        station: StationId,
        cargo: CargoTypeId,
        unit: &CargoUnit,
        cursor_order: Option<OrderId>,
    ) -> RouteQuery;
}

impl<F> RoutingOracle for F
where
    F: Fn(StationId, CargoTypeId, &CargoUnit, Option<OrderId>) -> RouteQuery,
{
    fn find_route_link(
        &self,
        station: StationId,
        cargo: CargoTypeId,
        unit: &CargoUnit,
        cursor_order: Option<OrderId>,
    ) -> RouteQuery {
        self(station, cargo, unit, cursor_order)
    }
}

/// Oracle for networks without destination routing. Every destination is
/// treated as reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRouting;

impl RoutingOracle for DirectRouting {
    fn find_route_link(
        &self,
        _station: StationId,
        _cargo: CargoTypeId,
        _unit: &CargoUnit,
        _cursor_order: Option<OrderId>,
    ) -> RouteQuery {
        RouteQuery::final_hop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_answers() {
        assert_eq!(RouteQuery::unreachable().hop(), RouteHop::Unreachable);
        assert_eq!(RouteQuery::final_hop().hop(), RouteHop::Final);
        let via = RouteQuery::via(OrderId(2), StationId(9));
        assert_eq!(
            via.hop(),
            RouteHop::Intermediate {
                link: RouteLink {
                    origin_order: OrderId(2),
                    next_station: StationId(9),
                },
                next_unload: Some(StationId(9)),
            }
        );
    }

    #[test]
    fn unreachable_wins_over_link() {
        let query = RouteQuery {
            link: Some(RouteLink {
                origin_order: OrderId(1),
                next_station: StationId(1),
            }),
            next_unload: None,
            found: false,
        };
        assert_eq!(query.hop(), RouteHop::Unreachable);
    }

    #[test]
    fn hint_falls_back_to_link_station() {
        let query = RouteQuery {
            link: Some(RouteLink {
                origin_order: OrderId(3),
                next_station: StationId(4),
            }),
            next_unload: None,
            found: true,
        };
        assert_eq!(query.hint(), (Some(OrderId(3)), Some(StationId(4))));
        assert_eq!(RouteQuery::final_hop().hint(), (None, None));
    }
}
