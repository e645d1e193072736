// Escrow order creation and cancellation
// Simulate-before-send lifecycle: allowance is topped up only when
// insufficient, every value-bearing call is dry-run first, and the order
// id is read from the OrderCreated log with a nextOrderId fallback
//
// Numan Thabit 2025 Nov

use crate::abi::{IERC20, IEscrow};
use crate::config::ChainConfig;
use crate::endpoint::EndpointResolver;
use crate::errors::BridgeError;
use crate::escrow::dispatch::FeeSchedule;
use crate::transport::jsonrpc::{RpcReader, RpcReceipt};
use crate::transport::wallet::{ensure_chain, send_transaction, TxRequest, WalletProvider};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use backoff::ExponentialBackoff;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle states as observed from receipts and delivery scans; the
/// engine never persists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Dispatched,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_amount_out: U256,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrderHandle {
    pub order_id: U256,
    pub tx_hash: B256,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStats {
    pub orders_created: u64,
    pub dispatches_ok: u64,
    pub dispatches_failed: u64,
}

/// Drives the escrow order lifecycle through an injected wallet
/// provider. Reads go through the endpoint resolver; writes go through
/// the wallet after a dry-run simulation.
pub struct EscrowEngine<W> {
    pub(crate) resolver: EndpointResolver,
    pub(crate) wallet: W,
    pub(crate) maker: Address,
    pub(crate) schedule: FeeSchedule,
    pub(crate) orders_created: AtomicU64,
    pub(crate) dispatches_ok: AtomicU64,
    pub(crate) dispatches_failed: AtomicU64,
}

impl<W: WalletProvider> EscrowEngine<W> {
    pub fn new(resolver: EndpointResolver, wallet: W, maker: Address) -> Self {
        Self {
            resolver,
            wallet,
            maker,
            schedule: FeeSchedule::default(),
            orders_created: AtomicU64::new(0),
            dispatches_ok: AtomicU64::new(0),
            dispatches_failed: AtomicU64::new(0),
        }
    }

    pub fn with_schedule(mut self, schedule: FeeSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn maker(&self) -> Address {
        self.maker
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            orders_created: self.orders_created.load(Ordering::Relaxed),
            dispatches_ok: self.dispatches_ok.load(Ordering::Relaxed),
            dispatches_failed: self.dispatches_failed.load(Ordering::Relaxed),
        }
    }

    pub async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderHandle, BridgeError> {
        let src = self.resolver.registry().chain(req.from_chain)?.clone();
        let dst_eid = self.resolver.registry().chain(req.to_chain)?.endpoint_id;
        let rpc = self.resolver.resolve(req.from_chain).await?;
        self.create_order_on(&rpc, &src, dst_eid, req).await
    }

    /// Create against an explicit reader, so the flow is drivable with
    /// injected fakes.
    pub(crate) async fn create_order_on<R: RpcReader>(
        &self,
        rpc: &R,
        src: &ChainConfig,
        dst_eid: u32,
        req: &CreateOrderRequest,
    ) -> Result<OrderHandle, BridgeError> {
        let first_url = src
            .default_rpc_urls
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        ensure_chain(&self.wallet, src.chain_id, src.name, first_url).await?;

        let native_in = req.token_in == Address::ZERO;
        if !native_in {
            self.ensure_allowance(rpc, src, req.token_in, req.amount_in)
                .await?;
        }

        let data = Bytes::from(
            IEscrow::createOrderCall {
                tokenIn: req.token_in,
                tokenOut: req.token_out,
                amountIn: req.amount_in,
                minAmountOut: req.min_amount_out,
                dstEid: dst_eid,
            }
            .abi_encode(),
        );
        let value = if native_in { req.amount_in } else { U256::ZERO };

        rpc.call_from(self.maker, src.escrow, data.clone(), value)
            .await
            .map_err(|err| BridgeError::Create(format!("create simulation reverted: {err}")))?;

        let tx_hash = send_transaction(
            &self.wallet,
            &TxRequest {
                from: self.maker,
                to: src.escrow,
                data,
                value,
            },
        )
        .await?;
        let receipt = self.await_receipt(rpc, tx_hash).await?;
        if !receipt.status {
            return Err(BridgeError::Create(format!(
                "create transaction {tx_hash} reverted on-chain"
            )));
        }

        let order_id = match order_id_from_receipt(&receipt, src.escrow) {
            Some(id) => id,
            None => {
                // Some nodes elide logs from freshly mined receipts. The
                // nextOrderId-1 fallback can race a concurrent creator.
                warn!(tx = %tx_hash, "OrderCreated log missing; reading nextOrderId");
                let next = self.next_order_id(rpc, src.escrow).await?;
                next.saturating_sub(U256::from(1))
            }
        };
        self.orders_created.fetch_add(1, Ordering::Relaxed);
        info!(
            order_id = %order_id,
            tx = %tx_hash,
            chain = src.chain_id,
            "order created"
        );
        Ok(OrderHandle { order_id, tx_hash })
    }

    /// Approve only when the current allowance is insufficient.
    async fn ensure_allowance<R: RpcReader>(
        &self,
        rpc: &R,
        src: &ChainConfig,
        token: Address,
        amount: U256,
    ) -> Result<(), BridgeError> {
        let data = Bytes::from(
            IERC20::allowanceCall {
                owner: self.maker,
                spender: src.escrow,
            }
            .abi_encode(),
        );
        let raw = rpc.call(token, data).await?;
        let current = IERC20::allowanceCall::abi_decode_returns(&raw, true)
            .map_err(|e| BridgeError::Rpc(format!("decode allowance: {e}")))?
            ._0;
        if current >= amount {
            return Ok(());
        }

        info!(token = %token, amount = %amount, "approving escrow spend");
        let approve_data = Bytes::from(
            IERC20::approveCall {
                spender: src.escrow,
                amount,
            }
            .abi_encode(),
        );
        let tx_hash = send_transaction(
            &self.wallet,
            &TxRequest {
                from: self.maker,
                to: token,
                data: approve_data,
                value: U256::ZERO,
            },
        )
        .await?;
        let receipt = self.await_receipt(rpc, tx_hash).await?;
        if !receipt.status {
            return Err(BridgeError::Create(format!(
                "approval transaction {tx_hash} reverted on-chain"
            )));
        }
        Ok(())
    }

    pub async fn cancel_order(&self, chain_id: u64, order_id: U256) -> Result<B256, BridgeError> {
        let src = self.resolver.registry().chain(chain_id)?.clone();
        let rpc = self.resolver.resolve(chain_id).await?;
        let first_url = src
            .default_rpc_urls
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        ensure_chain(&self.wallet, src.chain_id, src.name, first_url).await?;

        let data = Bytes::from(IEscrow::cancelOrderCall { orderId: order_id }.abi_encode());
        rpc.call_from(self.maker, src.escrow, data.clone(), U256::ZERO)
            .await
            .map_err(|err| {
                BridgeError::Dispatch(format!("cancel simulation reverted: {err}"))
            })?;
        let tx_hash = send_transaction(
            &self.wallet,
            &TxRequest {
                from: self.maker,
                to: src.escrow,
                data,
                value: U256::ZERO,
            },
        )
        .await?;
        let receipt = self.await_receipt(&rpc, tx_hash).await?;
        if !receipt.status {
            return Err(BridgeError::Dispatch(format!(
                "cancel transaction {tx_hash} reverted on-chain"
            )));
        }
        info!(order_id = %order_id, tx = %tx_hash, "order cancelled");
        Ok(tx_hash)
    }

    async fn next_order_id<R: RpcReader>(
        &self,
        rpc: &R,
        escrow: Address,
    ) -> Result<U256, BridgeError> {
        let data = Bytes::from(IEscrow::nextOrderIdCall {}.abi_encode());
        let raw = rpc.call(escrow, data).await?;
        Ok(IEscrow::nextOrderIdCall::abi_decode_returns(&raw, true)
            .map_err(|e| BridgeError::Rpc(format!("decode nextOrderId: {e}")))?
            ._0)
    }

    /// Poll for the receipt with exponential backoff; a missing receipt
    /// is transient, a node error is classified by the taxonomy.
    pub(crate) async fn await_receipt<R: RpcReader>(
        &self,
        rpc: &R,
        hash: B256,
    ) -> Result<RpcReceipt, BridgeError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(1500),
            max_interval: Duration::from_secs(6),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..ExponentialBackoff::default()
        };
        backoff::future::retry(policy, || async move {
            match rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => Err(backoff::Error::transient(BridgeError::Timeout(format!(
                    "receipt for {hash} not yet available"
                )))),
                Err(err) if err.is_transient() => Err(backoff::Error::transient(err)),
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
    }
}

/// Extract the order id from the `OrderCreated` log emitted by the
/// escrow, ignoring unrelated logs in the same receipt.
pub fn order_id_from_receipt(receipt: &RpcReceipt, escrow: Address) -> Option<U256> {
    receipt
        .logs
        .iter()
        .find(|log| {
            log.address == escrow
                && log.topics.first() == Some(&IEscrow::OrderCreated::SIGNATURE_HASH)
        })
        .and_then(|log| log.topics.get(1))
        .map(|topic| U256::from_be_bytes(topic.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainRegistry, SEPOLIA};
    use crate::transport::jsonrpc::{LogFilter, RpcLog};
    use alloy_primitives::address;
    use alloy_sol_types::SolValue;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    const MAKER: Address = address!("00000000000000000000000000000000000000aa");

    fn created_log(escrow: Address, order_id: u64) -> RpcLog {
        RpcLog {
            address: escrow,
            topics: vec![
                IEscrow::OrderCreated::SIGNATURE_HASH,
                B256::from(U256::from(order_id)),
            ],
            data: Bytes::new(),
            block_number: Some(1),
            transaction_hash: None,
        }
    }

    fn receipt_with(logs: Vec<RpcLog>) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: B256::ZERO,
            block_number: 1,
            status: true,
            logs,
        }
    }

    #[test]
    fn order_id_extraction_skips_unrelated_logs() {
        let escrow = address!("00000000000000000000000000000000000000ee");
        let noise = RpcLog {
            address: address!("00000000000000000000000000000000000000ff"),
            topics: vec![B256::ZERO],
            data: Bytes::new(),
            block_number: Some(1),
            transaction_hash: None,
        };
        let receipt = receipt_with(vec![noise, created_log(escrow, 42)]);
        assert_eq!(
            order_id_from_receipt(&receipt, escrow),
            Some(U256::from(42))
        );
        assert_eq!(order_id_from_receipt(&receipt_with(vec![]), escrow), None);
    }

    /// Wallet fake that records every method it was asked to sign.
    struct RecordingWallet {
        chain_hex: String,
        methods: Mutex<Vec<String>>,
    }

    impl RecordingWallet {
        fn new(chain_id: u64) -> Self {
            Self {
                chain_hex: format!("{chain_id:#x}"),
                methods: Mutex::new(Vec::new()),
            }
        }

        fn sends(&self) -> usize {
            self.methods
                .lock()
                .unwrap()
                .iter()
                .filter(|m| *m == "eth_sendTransaction")
                .count()
        }
    }

    impl WalletProvider for RecordingWallet {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, BridgeError> {
            self.methods.lock().unwrap().push(method.to_string());
            match method {
                "eth_chainId" => Ok(json!(self.chain_hex)),
                "eth_sendTransaction" => Ok(json!(format!("0x{}", "11".repeat(32)))),
                other => Err(BridgeError::Rpc(format!("unexpected wallet call {other}"))),
            }
        }
    }

    /// Reader fake: scripted allowance, permissive simulation, and a
    /// receipt carrying one OrderCreated log.
    struct ScriptedRpc {
        allowance: U256,
        escrow: Address,
        order_id: u64,
    }

    impl RpcReader for ScriptedRpc {
        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, BridgeError> {
            Ok(Bytes::from(self.allowance.abi_encode()))
        }

        async fn call_from(
            &self,
            _from: Address,
            _to: Address,
            _data: Bytes,
            _value: U256,
        ) -> Result<Bytes, BridgeError> {
            Ok(Bytes::new())
        }

        async fn balance(&self, _address: Address) -> Result<U256, BridgeError> {
            unreachable!("balance not used by order creation")
        }

        async fn block_number(&self) -> Result<u64, BridgeError> {
            unreachable!("block_number not used by order creation")
        }

        async fn get_code(&self, _address: Address) -> Result<Bytes, BridgeError> {
            unreachable!("get_code not used by order creation")
        }

        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<RpcLog>, BridgeError> {
            unreachable!("get_logs not used by order creation")
        }

        async fn transaction_receipt(
            &self,
            hash: B256,
        ) -> Result<Option<RpcReceipt>, BridgeError> {
            Ok(Some(RpcReceipt {
                transaction_hash: hash,
                block_number: 7,
                status: true,
                logs: vec![created_log(self.escrow, self.order_id)],
            }))
        }
    }

    fn engine(wallet: RecordingWallet) -> EscrowEngine<RecordingWallet> {
        EscrowEngine::new(
            EndpointResolver::new(ChainRegistry::builtin(None)),
            wallet,
            MAKER,
        )
    }

    fn request(token_in: Address) -> CreateOrderRequest {
        CreateOrderRequest {
            from_chain: SEPOLIA,
            to_chain: crate::config::ARB_SEPOLIA,
            token_in,
            token_out: Address::ZERO,
            amount_in: U256::from(1_000_000u64),
            min_amount_out: U256::from(900_000u64),
        }
    }

    #[tokio::test]
    async fn sufficient_allowance_skips_approval() {
        let engine = engine(RecordingWallet::new(SEPOLIA));
        let registry = ChainRegistry::builtin(None);
        let src = registry.chain(SEPOLIA).unwrap();
        let rpc = ScriptedRpc {
            allowance: U256::MAX,
            escrow: src.escrow,
            order_id: 5,
        };
        let token = src.stable;
        let handle = engine
            .create_order_on(&rpc, src, 40231, &request(token))
            .await
            .unwrap();
        assert_eq!(handle.order_id, U256::from(5));
        // Only the create itself was signed.
        assert_eq!(engine.wallet.sends(), 1);
        assert_eq!(engine.stats().orders_created, 1);
    }

    #[tokio::test]
    async fn low_allowance_approves_first() {
        let engine = engine(RecordingWallet::new(SEPOLIA));
        let registry = ChainRegistry::builtin(None);
        let src = registry.chain(SEPOLIA).unwrap();
        let rpc = ScriptedRpc {
            allowance: U256::ZERO,
            escrow: src.escrow,
            order_id: 9,
        };
        let token = src.stable;
        let handle = engine
            .create_order_on(&rpc, src, 40231, &request(token))
            .await
            .unwrap();
        assert_eq!(handle.order_id, U256::from(9));
        // Approval plus create.
        assert_eq!(engine.wallet.sends(), 2);
    }

    #[tokio::test]
    async fn native_input_never_touches_the_token() {
        let engine = engine(RecordingWallet::new(SEPOLIA));
        let registry = ChainRegistry::builtin(None);
        let src = registry.chain(SEPOLIA).unwrap();
        let rpc = ScriptedRpc {
            allowance: U256::ZERO,
            escrow: src.escrow,
            order_id: 3,
        };
        let handle = engine
            .create_order_on(&rpc, src, 40231, &request(Address::ZERO))
            .await
            .unwrap();
        assert_eq!(handle.order_id, U256::from(3));
        assert_eq!(engine.wallet.sends(), 1);
    }
}
