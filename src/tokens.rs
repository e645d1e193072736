// Token decimals resolver
// On-demand, indefinitely cached decimal lookups per (chain, token).
// Decimals feed estimate formatting only; fund-moving amounts always come
// from the caller as explicit wei values
//
// Numan Thabit 2025 Nov

use crate::abi::IERC20;
use crate::cache::TtlCache;
use crate::errors::BridgeError;
use crate::metrics::CACHE_HITS;
use crate::transport::jsonrpc::RpcReader;
use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use tracing::warn;

pub const NATIVE_DECIMALS: u8 = 18;

pub struct DecimalsCache {
    cache: TtlCache<(u64, Address), u8>,
}

impl Default for DecimalsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DecimalsCache {
    pub fn new() -> Self {
        Self {
            cache: TtlCache::new(None),
        }
    }

    /// Native/zero-address tokens are 18 without a network call; other
    /// tokens are read once and cached. A failed read degrades to 18.
    pub async fn decimals_of<R: RpcReader>(
        &self,
        rpc: &R,
        chain_id: u64,
        token: Address,
    ) -> u8 {
        if token == Address::ZERO {
            return NATIVE_DECIMALS;
        }
        let key = (chain_id, token);
        if let Some(decimals) = self.cache.get(&key).await {
            CACHE_HITS.with_label_values(&["decimals"]).inc();
            return decimals;
        }
        match self.read_decimals(rpc, token).await {
            Ok(decimals) => {
                self.cache.insert(key, decimals).await;
                decimals
            }
            Err(err) => {
                warn!(chain_id = chain_id, token = %token, error = %err, "decimals read failed; defaulting to 18");
                NATIVE_DECIMALS
            }
        }
    }

    async fn read_decimals<R: RpcReader>(
        &self,
        rpc: &R,
        token: Address,
    ) -> Result<u8, BridgeError> {
        let data = Bytes::from(IERC20::decimalsCall {}.abi_encode());
        let raw = rpc.call(token, data).await?;
        IERC20::decimalsCall::abi_decode_returns(&raw, true)
            .map(|ret| ret._0)
            .map_err(|e| BridgeError::Rpc(format!("decode decimals: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, B256, U256};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRpc {
        calls: AtomicU32,
    }

    impl RpcReader for CountingRpc {
        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(
                <alloy_sol_types::sol_data::Uint<8> as alloy_sol_types::SolType>::abi_encode(&6u8),
            ))
        }
        async fn call_from(
            &self,
            _from: Address,
            _to: Address,
            _data: Bytes,
            _value: U256,
        ) -> Result<Bytes, BridgeError> {
            unreachable!("not used")
        }
        async fn balance(&self, _address: Address) -> Result<U256, BridgeError> {
            unreachable!("not used")
        }
        async fn block_number(&self) -> Result<u64, BridgeError> {
            unreachable!("not used")
        }
        async fn get_code(&self, _address: Address) -> Result<Bytes, BridgeError> {
            unreachable!("not used")
        }
        async fn get_logs(
            &self,
            _filter: &crate::transport::jsonrpc::LogFilter,
        ) -> Result<Vec<crate::transport::jsonrpc::RpcLog>, BridgeError> {
            unreachable!("not used")
        }
        async fn transaction_receipt(
            &self,
            _hash: B256,
        ) -> Result<Option<crate::transport::jsonrpc::RpcReceipt>, BridgeError> {
            unreachable!("not used")
        }
    }

    #[tokio::test]
    async fn repeated_lookups_hit_the_cache() {
        let rpc = CountingRpc {
            calls: AtomicU32::new(0),
        };
        let cache = DecimalsCache::new();
        let token = address!("1c7D4B196Cb0C7B01d743Fbc6116a902379C7238");
        assert_eq!(cache.decimals_of(&rpc, 1, token).await, 6);
        assert_eq!(cache.decimals_of(&rpc, 1, token).await, 6);
        assert_eq!(cache.decimals_of(&rpc, 1, token).await, 6);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn native_token_skips_the_network() {
        let rpc = CountingRpc {
            calls: AtomicU32::new(0),
        };
        let cache = DecimalsCache::new();
        assert_eq!(cache.decimals_of(&rpc, 1, Address::ZERO).await, 18);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 0);
    }
}
