// Wallet/signer collaborator
// The engine treats signing as an opaque injected capability exposing
// `request(method, params)`; chain switching is awaited and serialized
// immediately before any signing call
//
// Numan Thabit 2025 Nov

use crate::errors::BridgeError;
use crate::transport::jsonrpc::EvmRpc;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

/// Injected provider in the EIP-1193 style. The engine does not manage
/// wallet UI state; it only issues requests and awaits results.
#[allow(async_fn_in_trait)]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

pub async fn request_accounts<W: WalletProvider>(
    wallet: &W,
) -> Result<Vec<Address>, BridgeError> {
    let result = wallet.request("eth_requestAccounts", json!([])).await?;
    let accounts = result
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    Ok(accounts)
}

/// Switch the wallet to `chain_id`, adding the chain when the wallet does
/// not know it yet. Awaited to completion before any signing call.
pub async fn ensure_chain<W: WalletProvider>(
    wallet: &W,
    chain_id: u64,
    chain_name: &str,
    rpc_url: &str,
) -> Result<(), BridgeError> {
    let hex_id = format!("{chain_id:#x}");
    let current = wallet.request("eth_chainId", json!([])).await?;
    if current.as_str() == Some(hex_id.as_str()) {
        return Ok(());
    }
    let switched = wallet
        .request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": hex_id }]),
        )
        .await;
    if switched.is_ok() {
        return Ok(());
    }
    debug!(chain_id = chain_id, "switch failed; adding chain to wallet");
    wallet
        .request(
            "wallet_addEthereumChain",
            json!([{
                "chainId": hex_id,
                "chainName": chain_name,
                "rpcUrls": [rpc_url],
            }]),
        )
        .await?;
    Ok(())
}

pub async fn send_transaction<W: WalletProvider>(
    wallet: &W,
    tx: &TxRequest,
) -> Result<B256, BridgeError> {
    let result = wallet
        .request(
            "eth_sendTransaction",
            json!([{
                "from": tx.from.to_string(),
                "to": tx.to.to_string(),
                "data": tx.data.to_string(),
                "value": format!("{:#x}", tx.value),
            }]),
        )
        .await?;
    result
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BridgeError::Rpc("eth_sendTransaction: bad tx hash".into()))
}

/// Passthrough provider forwarding wallet requests to a node with
/// unlocked accounts. Used by the service binary and by tests; browser
/// deployments inject their own provider instead.
pub struct RpcWallet {
    rpc: EvmRpc,
    /// Serializes switch-then-sign sequences on this provider.
    lock: Mutex<()>,
}

impl RpcWallet {
    pub fn new(rpc: EvmRpc) -> Self {
        Self {
            rpc,
            lock: Mutex::new(()),
        }
    }
}

impl WalletProvider for RpcWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let _guard = self.lock.lock().await;
        match method {
            // Node-backed wallets are already pinned to their chain.
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => Ok(Value::Null),
            "eth_requestAccounts" => self.rpc.request("eth_accounts", params).await,
            _ => self.rpc.request(method, params).await,
        }
    }
}
