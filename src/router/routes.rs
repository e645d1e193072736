// Route types and quote snapshots
// This file defines the message-path model: a direct leg or two legs
// through the fixed hub chain, with fee totals maintained as invariants
//
// Numan Thabit 2025 Nov

use alloy_primitives::U256;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteKind {
    Direct,
    Multihop,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteLeg {
    pub from_chain: u64,
    pub to_chain: u64,
    pub native_fee: U256,
    pub alt_fee: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub kind: RouteKind,
    /// Direct routes carry exactly one leg; multihop exactly two through
    /// the hub. Constructors enforce this.
    pub legs: Vec<RouteLeg>,
    pub total_native_fee: U256,
    pub total_alt_fee: U256,
}

impl Route {
    pub fn direct(leg: RouteLeg) -> Self {
        Self {
            kind: RouteKind::Direct,
            total_native_fee: leg.native_fee,
            total_alt_fee: leg.alt_fee,
            legs: vec![leg],
        }
    }

    pub fn multihop(first: RouteLeg, second: RouteLeg) -> Self {
        Self {
            kind: RouteKind::Multihop,
            total_native_fee: first.native_fee.saturating_add(second.native_fee),
            total_alt_fee: first.alt_fee.saturating_add(second.alt_fee),
            legs: vec![first, second],
        }
    }

    /// Combined fee used for route selection.
    pub fn total_fee(&self) -> U256 {
        self.total_native_fee.saturating_add(self.total_alt_fee)
    }
}

/// Point-in-time estimate returned to the caller; never mutated and
/// explicitly not a commitment.
#[derive(Debug, Clone, Serialize)]
pub struct SwapQuote {
    pub amount_in: f64,
    pub amount_out_estimate: f64,
    pub price_impact_pct: f64,
    /// Source-chain message fee in USD, when the oracle answered.
    pub fee_usd_estimate: Option<f64>,
    pub route: Route,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(from: u64, to: u64, native: u64, alt: u64) -> RouteLeg {
        RouteLeg {
            from_chain: from,
            to_chain: to,
            native_fee: U256::from(native),
            alt_fee: U256::from(alt),
        }
    }

    #[test]
    fn direct_route_totals() {
        let route = Route::direct(leg(1, 2, 100, 5));
        assert_eq!(route.kind, RouteKind::Direct);
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.total_native_fee, U256::from(100));
        assert_eq!(route.total_fee(), U256::from(105));
    }

    #[test]
    fn multihop_totals_are_leg_sums() {
        let route = Route::multihop(leg(1, 9, 100, 0), leg(9, 2, 40, 3));
        assert_eq!(route.kind, RouteKind::Multihop);
        assert_eq!(route.legs.len(), 2);
        assert_eq!(route.total_native_fee, U256::from(140));
        assert_eq!(route.total_alt_fee, U256::from(3));
        assert_eq!(route.total_fee(), U256::from(143));
    }
}
