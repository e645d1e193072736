// Destination reserve cache
// Short-TTL snapshot of the destination AMM pool so keystroke-driven
// quote requests do not each issue a fresh on-chain read
//
// Numan Thabit 2025 Nov

use crate::abi::IAmm;
use crate::cache::TtlCache;
use crate::errors::BridgeError;
use crate::metrics::CACHE_HITS;
use crate::transport::jsonrpc::RpcReader;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DestinationReserves {
    pub reserve_native: U256,
    pub reserve_stable: U256,
    pub fee_bps: u32,
    pub fetched_at: Instant,
}

pub struct ReserveCache {
    cache: TtlCache<u64, DestinationReserves>,
}

impl Default for ReserveCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReserveCache {
    pub fn new() -> Self {
        Self {
            cache: TtlCache::new(Some(Duration::from_secs(5))),
        }
    }

    pub async fn reserves_of<R: RpcReader>(
        &self,
        rpc: &R,
        chain_id: u64,
        amm: Address,
    ) -> Result<DestinationReserves, BridgeError> {
        if let Some(entry) = self.cache.get(&chain_id).await {
            CACHE_HITS.with_label_values(&["reserves"]).inc();
            return Ok(entry);
        }
        // Both pool reads belong to the same quote; fan out and join.
        let reserves_data = Bytes::from(IAmm::getReservesCall {}.abi_encode());
        let fee_data = Bytes::from(IAmm::feeBpsCall {}.abi_encode());
        let (reserves_raw, fee_raw) =
            tokio::join!(rpc.call(amm, reserves_data), rpc.call(amm, fee_data));
        let reserves = IAmm::getReservesCall::abi_decode_returns(&reserves_raw?, true)
            .map_err(|e| BridgeError::Rpc(format!("decode getReserves: {e}")))?;
        let fee = IAmm::feeBpsCall::abi_decode_returns(&fee_raw?, true)
            .map_err(|e| BridgeError::Rpc(format!("decode feeBps: {e}")))?;
        let entry = DestinationReserves {
            reserve_native: reserves.reserveNative,
            reserve_stable: reserves.reserveStable,
            fee_bps: fee._0.try_into().unwrap_or(u32::MAX),
            fetched_at: Instant::now(),
        };
        self.cache.insert(chain_id, entry.clone()).await;
        Ok(entry)
    }

    pub async fn clear(&self, chain_id: Option<u64>) {
        match chain_id {
            Some(id) => self.cache.remove(&id).await,
            None => self.cache.clear().await,
        }
    }
}
