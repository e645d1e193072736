// AMM quote simulator
// Structured on-chain quote with a constant-product fallback; produces a
// destination output estimate and price impact for the UI. Estimates
// only: execution minimums are supplied explicitly by the caller
//
// Numan Thabit 2025 Nov

use crate::abi::{IAmm, IPriceOracle};
use crate::cache::TtlCache;
use crate::config::ChainRegistry;
use crate::errors::BridgeError;
use crate::metrics::CACHE_HITS;
use crate::reserves::ReserveCache;
use crate::tokens::DecimalsCache;
use crate::transport::jsonrpc::RpcReader;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AmmQuoteRequest {
    pub chain_id: u64,
    pub token_in: Address,
    pub token_out: Address,
    /// Human units of the input token.
    pub amount_in: f64,
    /// Fees charged upstream of the AMM (bridge/protocol), applied before
    /// the pool's own fee.
    pub pre_subtract_fee_bps: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AmmQuote {
    pub amount_out: f64,
    pub price_impact_pct: f64,
}

/// Constant-product math over one pool hop. Pure; unit-tested directly.
/// Returns (amount out, price impact percent floored at zero).
pub fn constant_product_quote(
    amount_in: f64,
    reserve_in: f64,
    reserve_out: f64,
    fee_bps: u32,
) -> (f64, f64) {
    if amount_in <= 0.0 || reserve_in <= 0.0 || reserve_out <= 0.0 {
        return (0.0, 0.0);
    }
    let amount_in_after_fee = amount_in * (10_000.0 - fee_bps as f64) / 10_000.0;
    let amount_out =
        (reserve_out - reserve_in * reserve_out / (reserve_in + amount_in_after_fee)).max(0.0);
    let mid_price = reserve_out / reserve_in;
    let exec_price = amount_out / amount_in_after_fee;
    let price_impact_pct = ((mid_price - exec_price) / mid_price * 100.0).max(0.0);
    (amount_out, price_impact_pct)
}

/// Apply a basis-point fee charged ahead of the pool.
fn pre_subtract(amount_in: f64, fee_bps: Option<u32>) -> f64 {
    match fee_bps {
        Some(bps) => amount_in * (10_000.0 - bps as f64) / 10_000.0,
        None => amount_in,
    }
}

type QuoteKey = (u64, Address, Address, u64, u32);

pub struct QuoteSimulator {
    registry: ChainRegistry,
    decimals: DecimalsCache,
    reserves: ReserveCache,
    /// Keyed by a decimal-rounded amount bucket to absorb rapid repeated
    /// UI queries without materially harming freshness.
    quote_cache: TtlCache<QuoteKey, AmmQuote>,
    /// Native/USD oracle reads, 30 s TTL.
    price_cache: TtlCache<u64, f64>,
}

impl QuoteSimulator {
    pub fn new(registry: ChainRegistry) -> Self {
        Self {
            registry,
            decimals: DecimalsCache::new(),
            reserves: ReserveCache::new(),
            quote_cache: TtlCache::new(Some(Duration::from_secs(5))),
            price_cache: TtlCache::new(Some(Duration::from_secs(30))),
        }
    }

    pub fn reserves(&self) -> &ReserveCache {
        &self.reserves
    }

    pub fn decimals(&self) -> &DecimalsCache {
        &self.decimals
    }

    fn bucket(amount_in: f64) -> u64 {
        // Six decimal places; quotes for nearly identical amounts share
        // a cache entry.
        (amount_in * 1e6).round() as u64
    }

    pub async fn quote<R: RpcReader>(
        &self,
        rpc: &R,
        req: &AmmQuoteRequest,
    ) -> Result<AmmQuote, BridgeError> {
        if !req.amount_in.is_finite() || req.amount_in <= 0.0 {
            return Err(BridgeError::Unsupported(format!(
                "non-positive quote amount {}",
                req.amount_in
            )));
        }
        let chain = self.registry.chain(req.chain_id)?;
        // ETH-like inputs trade as their pool-wrapped representation.
        let mapped_in = if req.token_in == Address::ZERO {
            chain.wrapped_native
        } else {
            req.token_in
        };
        let mapped_out = if req.token_out == Address::ZERO {
            chain.wrapped_native
        } else {
            req.token_out
        };

        // Same-asset bridging never touches the pool: exact pass-through
        // less any upstream fee.
        if mapped_in == mapped_out {
            return Ok(AmmQuote {
                amount_out: pre_subtract(req.amount_in, req.pre_subtract_fee_bps),
                price_impact_pct: 0.0,
            });
        }

        let key: QuoteKey = (
            req.chain_id,
            mapped_in,
            mapped_out,
            Self::bucket(req.amount_in),
            req.pre_subtract_fee_bps.unwrap_or(0),
        );
        if let Some(cached) = self.quote_cache.get(&key).await {
            CACHE_HITS.with_label_values(&["amm_quote"]).inc();
            return Ok(cached);
        }

        let effective_in = pre_subtract(req.amount_in, req.pre_subtract_fee_bps);
        let quote = match self
            .structured_quote(rpc, chain.amm, mapped_in, mapped_out, effective_in, req)
            .await
        {
            Ok(quote) => quote,
            Err(err) if err.is_transient() || matches!(err, BridgeError::Rpc(_)) => {
                debug!(chain_id = req.chain_id, error = %err, "structured quote unavailable; using reserve fallback");
                self.fallback_quote(rpc, req.chain_id, mapped_in, mapped_out, effective_in)
                    .await?
            }
            Err(err) => return Err(err),
        };
        self.quote_cache.insert(key, quote.clone()).await;
        Ok(quote)
    }

    /// Clear the short-lived estimate caches, e.g. after a dispatch that
    /// moved the pool.
    pub async fn clear(&self, chain_id: Option<u64>) {
        self.quote_cache.clear().await;
        self.reserves.clear(chain_id).await;
    }

    /// Chain's native/USD price from its oracle. Display only, so a
    /// non-positive or stale answer is an error the caller can drop.
    pub async fn native_price_usd<R: RpcReader>(
        &self,
        rpc: &R,
        chain_id: u64,
    ) -> Result<f64, BridgeError> {
        if let Some(price) = self.price_cache.get(&chain_id).await {
            CACHE_HITS.with_label_values(&["oracle_price"]).inc();
            return Ok(price);
        }
        let oracle = self.registry.chain(chain_id)?.price_oracle;
        let round_data = Bytes::from(IPriceOracle::latestRoundDataCall {}.abi_encode());
        let decimals_data = Bytes::from(IPriceOracle::decimalsCall {}.abi_encode());
        let (round_raw, decimals_raw) = tokio::join!(
            rpc.call(oracle, round_data),
            rpc.call(oracle, decimals_data)
        );
        let round = IPriceOracle::latestRoundDataCall::abi_decode_returns(&round_raw?, true)
            .map_err(|e| BridgeError::Rpc(format!("decode latestRoundData: {e}")))?;
        let decimals = IPriceOracle::decimalsCall::abi_decode_returns(&decimals_raw?, true)
            .map_err(|e| BridgeError::Rpc(format!("decode oracle decimals: {e}")))?
            ._0;
        if round.answer.is_negative() || round.answer.is_zero() {
            return Err(BridgeError::Unsupported(format!(
                "oracle {oracle} returned non-positive price {}",
                round.answer
            )));
        }
        let price = from_wei(round.answer.into_raw(), decimals);
        self.price_cache.insert(chain_id, price).await;
        Ok(price)
    }

    async fn structured_quote<R: RpcReader>(
        &self,
        rpc: &R,
        amm: Address,
        token_in: Address,
        token_out: Address,
        effective_in: f64,
        req: &AmmQuoteRequest,
    ) -> Result<AmmQuote, BridgeError> {
        let dec_in = self.decimals.decimals_of(rpc, req.chain_id, token_in).await;
        let dec_out = self
            .decimals
            .decimals_of(rpc, req.chain_id, token_out)
            .await;
        let amount_in_wei = to_wei(effective_in, dec_in)?;
        let data = Bytes::from(
            IAmm::getSwapQuoteCall {
                tokenIn: token_in,
                tokenOut: token_out,
                amountIn: amount_in_wei,
            }
            .abi_encode(),
        );
        let raw = rpc.call(amm, data).await?;
        let ret = IAmm::getSwapQuoteCall::abi_decode_returns(&raw, true)
            .map_err(|e| BridgeError::Rpc(format!("decode getSwapQuote: {e}")))?;
        Ok(AmmQuote {
            amount_out: from_wei(ret.amountOut, dec_out),
            price_impact_pct: u256_to_f64(ret.priceImpactBps) / 100.0,
        })
    }

    async fn fallback_quote<R: RpcReader>(
        &self,
        rpc: &R,
        chain_id: u64,
        token_in: Address,
        token_out: Address,
        effective_in: f64,
    ) -> Result<AmmQuote, BridgeError> {
        let chain = self.registry.chain(chain_id)?;
        let pool = self.reserves.reserves_of(rpc, chain_id, chain.amm).await?;
        let dec_native = self
            .decimals
            .decimals_of(rpc, chain_id, chain.wrapped_native)
            .await;
        let dec_stable = self.decimals.decimals_of(rpc, chain_id, chain.stable).await;
        let reserve_native = from_wei(pool.reserve_native, dec_native);
        let reserve_stable = from_wei(pool.reserve_stable, dec_stable);

        // The fallback knows exactly two asset classes.
        let (reserve_in, reserve_out) =
            if token_in == chain.wrapped_native && token_out == chain.stable {
                (reserve_native, reserve_stable)
            } else if token_in == chain.stable && token_out == chain.wrapped_native {
                (reserve_stable, reserve_native)
            } else {
                return Err(BridgeError::Unsupported(format!(
                    "fallback quote only covers native/stable pairs, got {token_in} -> {token_out}"
                )));
            };

        let (amount_out, price_impact_pct) =
            constant_product_quote(effective_in, reserve_in, reserve_out, pool.fee_bps);
        if amount_out == 0.0 {
            warn!(
                chain_id = chain_id,
                amount_in = effective_in,
                "fallback quote produced zero output"
            );
        }
        Ok(AmmQuote {
            amount_out,
            price_impact_pct,
        })
    }
}

pub fn to_wei(amount: f64, decimals: u8) -> Result<U256, BridgeError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(BridgeError::Unsupported(format!("bad amount {amount}")));
    }
    let scaled = amount * 10f64.powi(decimals as i32);
    if scaled >= u128::MAX as f64 {
        return Err(BridgeError::Unsupported(format!(
            "amount {amount} overflows quote range"
        )));
    }
    Ok(U256::from(scaled as u128))
}

pub fn from_wei(value: U256, decimals: u8) -> f64 {
    u256_to_f64(value) / 10f64.powi(decimals as i32)
}

fn u256_to_f64(value: U256) -> f64 {
    // Estimate precision only; f64 is the UI currency here.
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}
