// Route planner
// Computes direct and hub-relayed message fee quotes concurrently and
// picks the cheaper viable path; carries a longer-lived wiring-health
// probe for diagnosing unsupported routes
//
// Numan Thabit 2025 Nov

use crate::abi::{encode_execute_payload, encode_gas_options, IBusRouter};
use crate::cache::TtlCache;
use crate::endpoint::EndpointResolver;
use crate::errors::BridgeError;
use crate::metrics::CACHE_HITS;
use crate::router::routes::{Route, RouteLeg};
use crate::transport::jsonrpc::RpcReader;
use crate::transport::retry::{with_retries, RetryPolicy};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Destination execution gas hint used for planning quotes. Dispatch
/// re-quotes with its own adaptive budget.
pub const PLANNING_GAS_HINT: u64 = 200_000;

#[derive(Debug, Clone)]
pub struct RouteQuery {
    pub from_chain: u64,
    pub to_chain: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_wei: U256,
    pub user: Address,
}

type FeeKey = (u64, u64, Address, Address, U256, Address);

#[derive(Debug, Clone, Serialize)]
pub struct LegWiring {
    pub from_chain: u64,
    pub to_chain: u64,
    pub router_deployed: bool,
    pub peer_set: bool,
}

/// Answer to "is this route even configured?", distinguishing transient
/// RPC failure from a genuinely unwired route.
#[derive(Debug, Clone, Serialize)]
pub struct WiringHealth {
    pub legs: Vec<LegWiring>,
}

impl WiringHealth {
    pub fn healthy(&self) -> bool {
        self.legs
            .iter()
            .all(|leg| leg.router_deployed && leg.peer_set)
    }
}

pub struct Planner {
    resolver: EndpointResolver,
    fee_cache: TtlCache<FeeKey, Route>,
    wiring_cache: TtlCache<(u64, u64), WiringHealth>,
}

impl Planner {
    pub fn new(resolver: EndpointResolver) -> Self {
        Self {
            resolver,
            fee_cache: TtlCache::new(Some(Duration::from_secs(8))),
            wiring_cache: TtlCache::new(Some(Duration::from_secs(60))),
        }
    }

    /// The payload used for fee quoting is a size-representative
    /// stand-in, not the later-dispatched payload. Kept deliberately:
    /// "fixing" it would silently change which route looks cheaper.
    fn representative_payload() -> Bytes {
        encode_execute_payload(U256::MAX, Address::ZERO, U256::MAX)
    }

    pub async fn plan_route(&self, query: &RouteQuery) -> Result<Route, BridgeError> {
        let key: FeeKey = (
            query.from_chain,
            query.to_chain,
            query.token_in,
            query.token_out,
            query.amount_wei,
            query.user,
        );
        if let Some(route) = self.fee_cache.get(&key).await {
            CACHE_HITS.with_label_values(&["route_fee"]).inc();
            return Ok(route);
        }

        let hub = self.resolver.registry().hub_chain_id();
        let via_hub = hub != query.from_chain && hub != query.to_chain;

        // Settle both quotes; neither short-circuits the other.
        let direct_fut = self.quote_direct(query.from_chain, query.to_chain);
        let hub_fut = async {
            if !via_hub {
                return None;
            }
            Some(self.quote_via_hub(query.from_chain, hub, query.to_chain).await)
        };
        let (direct, multihop) = tokio::join!(direct_fut, hub_fut);

        let route = select_route(direct, multihop)?;
        info!(
            from = query.from_chain,
            to = query.to_chain,
            kind = ?route.kind,
            total_native_fee = %route.total_native_fee,
            total_alt_fee = %route.total_alt_fee,
            "route selected"
        );
        self.fee_cache.insert(key, route.clone()).await;
        Ok(route)
    }

    async fn quote_direct(&self, from: u64, to: u64) -> Result<Route, BridgeError> {
        let leg = self.quote_leg(from, to).await?;
        Ok(Route::direct(leg))
    }

    async fn quote_via_hub(&self, from: u64, hub: u64, to: u64) -> Result<Route, BridgeError> {
        let (first, second) = tokio::join!(self.quote_leg(from, hub), self.quote_leg(hub, to));
        Ok(Route::multihop(first?, second?))
    }

    /// Fee quote for one message leg, issued against the source-side
    /// router of the leg.
    async fn quote_leg(&self, from: u64, to: u64) -> Result<RouteLeg, BridgeError> {
        let router = self.resolver.registry().chain(from)?.router;
        let dst_eid = self.resolver.registry().chain(to)?.endpoint_id;
        let rpc = self.resolver.resolve(from).await?;
        let data = Bytes::from(
            IBusRouter::quoteCall {
                dstEid: dst_eid,
                payload: Self::representative_payload(),
                options: encode_gas_options(PLANNING_GAS_HINT),
                payInAlt: false,
            }
            .abi_encode(),
        );
        let raw = with_retries(
            || rpc.call(router, data.clone()),
            RetryPolicy::default(),
        )
        .await?;
        let ret = IBusRouter::quoteCall::abi_decode_returns(&raw, true)
            .map_err(|e| BridgeError::Rpc(format!("decode quote: {e}")))?;
        Ok(RouteLeg {
            from_chain: from,
            to_chain: to,
            native_fee: ret.nativeFee,
            alt_fee: ret.altFee,
        })
    }

    /// Wiring health probe, cached longer than fee quotes: checks the
    /// router is deployed and has a non-zero peer binding for the
    /// destination, per leg for multihop.
    pub async fn wiring_health(&self, from: u64, to: u64) -> Result<WiringHealth, BridgeError> {
        if let Some(health) = self.wiring_cache.get(&(from, to)).await {
            CACHE_HITS.with_label_values(&["wiring_health"]).inc();
            return Ok(health);
        }
        let hub = self.resolver.registry().hub_chain_id();
        let mut legs = vec![self.probe_leg(from, to).await?];
        if hub != from && hub != to {
            legs.push(self.probe_leg(from, hub).await?);
            legs.push(self.probe_leg(hub, to).await?);
        }
        let health = WiringHealth { legs };
        self.wiring_cache.insert((from, to), health.clone()).await;
        Ok(health)
    }

    async fn probe_leg(&self, from: u64, to: u64) -> Result<LegWiring, BridgeError> {
        let router = self.resolver.registry().chain(from)?.router;
        let dst_eid = self.resolver.registry().chain(to)?.endpoint_id;
        let rpc = self.resolver.resolve(from).await?;
        let peers_data = Bytes::from(IBusRouter::peersCall { eid: dst_eid }.abi_encode());
        let (code, peer_raw) = tokio::join!(rpc.get_code(router), rpc.call(router, peers_data));
        let router_deployed = !code?.is_empty();
        let peer_set = if router_deployed {
            let ret = IBusRouter::peersCall::abi_decode_returns(&peer_raw?, true)
                .map_err(|e| BridgeError::Rpc(format!("decode peers: {e}")))?;
            ret._0 != B256::ZERO
        } else {
            false
        };
        debug!(
            from = from,
            to = to,
            deployed = router_deployed,
            peer = peer_set,
            "wiring leg probed"
        );
        Ok(LegWiring {
            from_chain: from,
            to_chain: to,
            router_deployed,
            peer_set,
        })
    }
}

/// Selection rule over the two settled quotes. Pure so the matrix is
/// unit-testable without a network.
pub fn select_route(
    direct: Result<Route, BridgeError>,
    multihop: Option<Result<Route, BridgeError>>,
) -> Result<Route, BridgeError> {
    match (direct, multihop) {
        (Ok(direct), Some(Ok(multihop))) => {
            // Ties favor the direct path.
            if multihop.total_fee() < direct.total_fee() {
                Ok(multihop)
            } else {
                Ok(direct)
            }
        }
        (Ok(direct), _) => Ok(direct),
        (Err(direct_err), Some(Ok(multihop))) => {
            debug!(error = %direct_err, "direct quote failed; using hub route");
            Ok(multihop)
        }
        (Err(direct_err), Some(Err(multihop_err))) => {
            // The direct error is the primary signal; the hub error is
            // diagnostics only.
            debug!(error = %multihop_err, "multihop quote also failed");
            Err(direct_err)
        }
        (Err(direct_err), None) => Err(direct_err),
    }
}

/// Monotonic sequence counter invalidating stale in-flight quote
/// requests: only the most recent token's result should be applied.
#[derive(Default)]
pub struct QuoteSequencer {
    seq: AtomicU64,
}

impl QuoteSequencer {
    pub fn begin(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(kind: RouteKind, native: u64, alt: u64) -> Route {
        let leg = RouteLeg {
            from_chain: 1,
            to_chain: 2,
            native_fee: U256::from(native),
            alt_fee: U256::from(alt),
        };
        match kind {
            RouteKind::Direct => Route::direct(leg),
            RouteKind::Multihop => Route::multihop(
                RouteLeg {
                    from_chain: 1,
                    to_chain: 9,
                    native_fee: U256::from(native / 2),
                    alt_fee: U256::from(alt),
                },
                RouteLeg {
                    from_chain: 9,
                    to_chain: 2,
                    native_fee: U256::from(native - native / 2),
                    alt_fee: U256::ZERO,
                },
            ),
        }
    }

    use crate::router::routes::RouteKind;

    #[test]
    fn cheaper_total_wins() {
        let selected = select_route(
            Ok(route(RouteKind::Direct, 100, 10)),
            Some(Ok(route(RouteKind::Multihop, 80, 5))),
        )
        .unwrap();
        assert_eq!(selected.kind, RouteKind::Multihop);

        let selected = select_route(
            Ok(route(RouteKind::Direct, 50, 0)),
            Some(Ok(route(RouteKind::Multihop, 80, 5))),
        )
        .unwrap();
        assert_eq!(selected.kind, RouteKind::Direct);
    }

    #[test]
    fn ties_favor_direct() {
        let selected = select_route(
            Ok(route(RouteKind::Direct, 100, 0)),
            Some(Ok(route(RouteKind::Multihop, 100, 0))),
        )
        .unwrap();
        assert_eq!(selected.kind, RouteKind::Direct);
    }

    #[test]
    fn single_success_is_returned() {
        let selected = select_route(
            Err(BridgeError::Rpc("direct down".into())),
            Some(Ok(route(RouteKind::Multihop, 80, 0))),
        )
        .unwrap();
        assert_eq!(selected.kind, RouteKind::Multihop);

        let selected = select_route(Ok(route(RouteKind::Direct, 100, 0)), None).unwrap();
        assert_eq!(selected.kind, RouteKind::Direct);
    }

    #[test]
    fn both_failing_propagates_direct_error() {
        let result = select_route(
            Err(BridgeError::Rpc("direct down".into())),
            Some(Err(BridgeError::Wiring("no peer".into()))),
        );
        assert!(matches!(result, Err(BridgeError::Rpc(msg)) if msg == "direct down"));
    }

    #[test]
    fn sequencer_supersedes_stale_tokens() {
        let seq = QuoteSequencer::default();
        let first = seq.begin();
        let second = seq.begin();
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
    }
}
