// Adaptive dispatcher
// The bridge's fee quote can be stale and destination gas unpredictable,
// so dispatch runs a fee-adaptive simulate-then-send loop: grow the fee
// candidate on simulate failure, escalate the destination gas budget at
// fixed checkpoints, and only then spend gas for real
//
// Numan Thabit 2025 Nov

use crate::abi::{encode_execute_payload, encode_gas_options, IBusRouter, IEscrow};
use crate::errors::BridgeError;
use crate::escrow::order::EscrowEngine;
use crate::escrow::preflight::{check_destination_liquidity, check_wiring};
use crate::metrics::DISPATCH_PHASES;
use crate::transport::jsonrpc::RpcReader;
use crate::transport::wallet::{ensure_chain, send_transaction, TxRequest, WalletProvider};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::Ordering;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPhase {
    Quote,
    Simulate,
    Send,
    Error,
    Done,
}

impl DispatchPhase {
    fn as_str(&self) -> &'static str {
        match self {
            DispatchPhase::Quote => "quote",
            DispatchPhase::Simulate => "simulate",
            DispatchPhase::Send => "send",
            DispatchPhase::Error => "error",
            DispatchPhase::Done => "done",
        }
    }
}

/// Transient per-call progress record for external display; never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub phase: DispatchPhase,
    pub attempt: u32,
    pub fee_wei: U256,
    pub gas_budget: u64,
    pub message: String,
}

pub type ProgressSink<'a> = &'a (dyn Fn(DispatchEvent) + Send + Sync);

pub fn log_progress(event: DispatchEvent) {
    info!(
        phase = event.phase.as_str(),
        attempt = event.attempt,
        fee_wei = %event.fee_wei,
        gas_budget = event.gas_budget,
        message = %event.message,
        "dispatch progress"
    );
}

/// Fee/gas growth schedule for the adaptive search.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Conservative starting destination-gas-budget hint.
    pub initial_gas_budget: u64,
    /// Fixed absolute safety margin on top of the quoted fee.
    pub fee_margin_wei: U256,
    /// Fee candidate growth per failed simulation, in percent.
    pub growth_percent: u64,
    /// Small fixed increment added on top of the percentage growth.
    pub growth_add_wei: U256,
    /// Simulations per outer attempt.
    pub max_inner: u32,
    /// Total outer quote attempts.
    pub max_outer: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            initial_gas_budget: 200_000,
            fee_margin_wei: U256::from(100_000_000_000_000u64), // 0.0001 native
            growth_percent: 25,
            growth_add_wei: U256::from(10_000_000_000_000u64),
            max_inner: 6,
            max_outer: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeSearchOutcome {
    pub fee_wei: U256,
    pub gas_budget: u64,
    pub outer_attempts: u32,
}

enum FailureClass {
    /// Grow the fee (or escalate gas) and try again.
    Retry,
    Terminal(BridgeError),
}

/// Translate a simulation failure into the taxonomy instead of surfacing
/// raw revert text. Insufficient-fee style reverts mean "re-quote and
/// retry"; a missing peer is a wiring fault; authorization or order-state
/// guards are terminal dispatch failures.
fn classify_simulation_failure(err: &BridgeError) -> FailureClass {
    let text = err.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("no_peer") || lowered.contains("peer not set") {
        return FailureClass::Terminal(BridgeError::Wiring(format!(
            "router peer missing for destination: {text}"
        )));
    }
    for guard in ["not_maker", "only_maker", "unauthorized", "bad_status", "invalid_status", "already_dispatched"] {
        if lowered.contains(guard) {
            return FailureClass::Terminal(BridgeError::Dispatch(format!(
                "on-chain guard {guard} rejected the dispatch: {text}"
            )));
        }
    }
    // INSUFFICIENT_FEE reverts, transient RPC noise, and unknown reverts
    // all fall into the growth schedule.
    FailureClass::Retry
}

/// The adaptive fee search interpreter: quote, add margin, simulate,
/// grow on failure, escalate the destination gas hint at the second and
/// fourth failed simulation of an outer attempt. Independent of any
/// transport so it can be driven by injected fakes.
pub async fn run_fee_search<Q, QF, S, SF>(
    mut quote: Q,
    mut simulate: S,
    schedule: &FeeSchedule,
    progress: ProgressSink<'_>,
) -> Result<FeeSearchOutcome, BridgeError>
where
    Q: FnMut(u64) -> QF,
    QF: Future<Output = Result<U256, BridgeError>>,
    S: FnMut(U256, u64) -> SF,
    SF: Future<Output = Result<(), BridgeError>>,
{
    let mut gas_budget = schedule.initial_gas_budget;
    let mut escalations = 0u32;
    let mut last_reason = String::from("no simulation executed");

    for outer in 1..=schedule.max_outer {
        emit(
            progress,
            DispatchPhase::Quote,
            outer,
            U256::ZERO,
            gas_budget,
            "quoting messaging fee",
        );
        let quoted = quote(gas_budget).await?;
        let mut candidate = quoted.saturating_add(schedule.fee_margin_wei);

        let mut inner = 0u32;
        while inner < schedule.max_inner {
            emit(
                progress,
                DispatchPhase::Simulate,
                outer,
                candidate,
                gas_budget,
                "dry-run simulating dispatch",
            );
            match simulate(candidate, gas_budget).await {
                Ok(()) => {
                    return Ok(FeeSearchOutcome {
                        fee_wei: candidate,
                        gas_budget,
                        outer_attempts: outer,
                    });
                }
                Err(err) => match classify_simulation_failure(&err) {
                    FailureClass::Terminal(terminal) => {
                        emit(
                            progress,
                            DispatchPhase::Error,
                            outer,
                            candidate,
                            gas_budget,
                            &terminal.to_string(),
                        );
                        return Err(terminal);
                    }
                    FailureClass::Retry => {
                        last_reason = err.to_string();
                        inner += 1;
                        // Two checkpoints escalate the destination gas
                        // hint instead of growing the fee further.
                        if inner == 2 && escalations == 0 {
                            gas_budget = schedule.initial_gas_budget * 2;
                            escalations = 1;
                            break;
                        }
                        if inner == 4 && escalations == 1 {
                            gas_budget = schedule.initial_gas_budget * 3;
                            escalations = 2;
                            break;
                        }
                        candidate = candidate
                            .saturating_mul(U256::from(100 + schedule.growth_percent))
                            / U256::from(100)
                            + schedule.growth_add_wei;
                    }
                },
            }
        }
    }

    let terminal = BridgeError::Dispatch(format!(
        "adaptive fee search exhausted after {} attempts: underquoted fee or insufficient destination gas; last failure: {last_reason}",
        schedule.max_outer
    ));
    emit(
        progress,
        DispatchPhase::Error,
        schedule.max_outer,
        U256::ZERO,
        gas_budget,
        &terminal.to_string(),
    );
    Err(terminal)
}

fn emit(
    progress: ProgressSink<'_>,
    phase: DispatchPhase,
    attempt: u32,
    fee_wei: U256,
    gas_budget: u64,
    message: &str,
) {
    DISPATCH_PHASES.with_label_values(&[phase.as_str()]).inc();
    progress(DispatchEvent {
        phase,
        attempt,
        fee_wei,
        gas_budget,
        message: message.to_string(),
    });
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub order_id: U256,
    pub recipient: Address,
    pub min_amount_out: U256,
    /// Same-asset native-to-native bridging needs the destination escrow
    /// balance verified against the minimum payout.
    pub native_to_native: bool,
}

impl<W: WalletProvider> EscrowEngine<W> {
    /// Preflight the wiring and liquidity, run the adaptive fee search,
    /// then submit the real dispatch and await its receipt.
    pub async fn dispatch_order(
        &self,
        req: &DispatchRequest,
        progress: ProgressSink<'_>,
    ) -> Result<B256, BridgeError> {
        let src = self.resolver.registry().chain(req.from_chain)?.clone();
        let dst = self.resolver.registry().chain(req.to_chain)?.clone();
        let rpc = self.resolver.resolve(req.from_chain).await?;

        let wiring = check_wiring(&rpc, src.escrow, src.router, dst.endpoint_id).await?;
        if let Some(pointer) = wiring.failing_pointer() {
            return Err(BridgeError::Wiring(pointer.to_string()));
        }
        if req.native_to_native {
            let dst_rpc = self.resolver.resolve(req.to_chain).await?;
            check_destination_liquidity(&dst_rpc, dst.escrow, req.min_amount_out).await?;
        }

        let recipient32 = B256::left_padding_from(req.recipient.as_slice());
        let payload = encode_execute_payload(req.order_id, req.recipient, req.min_amount_out);

        let quote_rpc = rpc.clone();
        let quote = move |gas: u64| {
            let rpc = quote_rpc.clone();
            let payload = payload.clone();
            let router = src.router;
            let dst_eid = dst.endpoint_id;
            async move {
                let data = Bytes::from(
                    IBusRouter::quoteCall {
                        dstEid: dst_eid,
                        payload,
                        options: encode_gas_options(gas),
                        payInAlt: false,
                    }
                    .abi_encode(),
                );
                let raw = rpc.call(router, data).await?;
                IBusRouter::quoteCall::abi_decode_returns(&raw, true)
                    .map(|ret| ret.nativeFee)
                    .map_err(|e| BridgeError::Rpc(format!("decode quote: {e}")))
            }
        };

        let sim_rpc = rpc.clone();
        let maker = self.maker;
        let escrow = src.escrow;
        let order_id = req.order_id;
        let min_out = req.min_amount_out;
        let simulate = move |fee: U256, gas: u64| {
            let rpc = sim_rpc.clone();
            async move {
                let data = Bytes::from(
                    IEscrow::dispatchToDstCall {
                        orderId: order_id,
                        recipient: recipient32,
                        minAmountOut: min_out,
                        options: encode_gas_options(gas),
                    }
                    .abi_encode(),
                );
                rpc.call_from(maker, escrow, data, fee).await.map(|_| ())
            }
        };

        let outcome = run_fee_search(quote, simulate, &self.schedule, progress).await?;

        emit(
            progress,
            DispatchPhase::Send,
            outcome.outer_attempts,
            outcome.fee_wei,
            outcome.gas_budget,
            "submitting dispatch transaction",
        );
        let first_url = src
            .default_rpc_urls
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        ensure_chain(&self.wallet, src.chain_id, src.name, first_url).await?;
        let data = Bytes::from(
            IEscrow::dispatchToDstCall {
                orderId: req.order_id,
                recipient: recipient32,
                minAmountOut: req.min_amount_out,
                options: encode_gas_options(outcome.gas_budget),
            }
            .abi_encode(),
        );
        let tx_hash = send_transaction(
            &self.wallet,
            &TxRequest {
                from: self.maker,
                to: src.escrow,
                data,
                value: outcome.fee_wei,
            },
        )
        .await?;

        let receipt = self.await_receipt(&rpc, tx_hash).await?;
        if !receipt.status {
            self.dispatches_failed.fetch_add(1, Ordering::Relaxed);
            let terminal = BridgeError::Dispatch(format!(
                "dispatch transaction {tx_hash} reverted on-chain"
            ));
            emit(
                progress,
                DispatchPhase::Error,
                outcome.outer_attempts,
                outcome.fee_wei,
                outcome.gas_budget,
                &terminal.to_string(),
            );
            return Err(terminal);
        }
        self.dispatches_ok.fetch_add(1, Ordering::Relaxed);
        emit(
            progress,
            DispatchPhase::Done,
            outcome.outer_attempts,
            outcome.fee_wei,
            outcome.gas_budget,
            "dispatch confirmed on source chain",
        );
        info!(
            order_id = %req.order_id,
            tx = %tx_hash,
            fee_wei = %outcome.fee_wei,
            gas_budget = outcome.gas_budget,
            "order dispatched"
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn tight_schedule() -> FeeSchedule {
        FeeSchedule {
            initial_gas_budget: 100,
            fee_margin_wei: U256::from(10),
            growth_percent: 25,
            growth_add_wei: U256::from(5),
            max_inner: 6,
            max_outer: 4,
        }
    }

    #[tokio::test]
    async fn converges_when_threshold_is_reachable() {
        let sims = AtomicU32::new(0);
        let threshold = U256::from(200);
        let outcome = run_fee_search(
            |_gas| async { Ok(U256::from(100)) },
            |fee, _gas| {
                sims.fetch_add(1, Ordering::SeqCst);
                async move {
                    if fee >= threshold {
                        Ok(())
                    } else {
                        Err(BridgeError::Rpc("execution reverted; revert: INSUFFICIENT_FEE".into()))
                    }
                }
            },
            &tight_schedule(),
            &|_| {},
        )
        .await
        .unwrap();
        assert!(outcome.fee_wei >= threshold);
        assert!(sims.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn exhaustion_raises_terminal_dispatch_error() {
        let result = run_fee_search(
            |_gas| async { Ok(U256::from(100)) },
            |_fee, _gas| async {
                Err(BridgeError::Rpc(
                    "execution reverted; revert: INSUFFICIENT_FEE".into(),
                ))
            },
            &tight_schedule(),
            &|_| {},
        )
        .await;
        match result {
            Err(BridgeError::Dispatch(msg)) => {
                assert!(msg.contains("underquoted fee or insufficient destination gas"));
                assert!(msg.contains("INSUFFICIENT_FEE"));
            }
            other => panic!("expected terminal dispatch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gas_hint_escalates_at_checkpoints() {
        let budgets = Mutex::new(Vec::new());
        let _ = run_fee_search(
            |gas| {
                budgets.lock().unwrap().push(gas);
                async { Ok(U256::from(100)) }
            },
            |_fee, _gas| async {
                Err(BridgeError::Rpc(
                    "execution reverted; revert: INSUFFICIENT_FEE".into(),
                ))
            },
            &tight_schedule(),
            &|_| {},
        )
        .await;
        let seen = budgets.lock().unwrap().clone();
        // Initial budget, then x2 after the first checkpoint, then x3.
        assert_eq!(&seen[..3], &[100, 200, 300]);
    }

    #[tokio::test]
    async fn missing_peer_is_terminal_wiring() {
        let result = run_fee_search(
            |_gas| async { Ok(U256::from(100)) },
            |_fee, _gas| async {
                Err(BridgeError::Rpc("execution reverted; revert: NO_PEER".into()))
            },
            &tight_schedule(),
            &|_| {},
        )
        .await;
        assert!(matches!(result, Err(BridgeError::Wiring(_))));
    }

    #[tokio::test]
    async fn authorization_guard_is_terminal_dispatch() {
        let result = run_fee_search(
            |_gas| async { Ok(U256::from(100)) },
            |_fee, _gas| async {
                Err(BridgeError::Rpc(
                    "execution reverted; revert: NOT_MAKER".into(),
                ))
            },
            &tight_schedule(),
            &|_| {},
        )
        .await;
        match result {
            Err(BridgeError::Dispatch(msg)) => assert!(msg.contains("not_maker")),
            other => panic!("expected dispatch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_events_cover_phases() {
        let phases = Mutex::new(Vec::new());
        let threshold = U256::from(120);
        let sink = |event: DispatchEvent| {
            phases.lock().unwrap().push(event.phase);
        };
        run_fee_search(
            |_gas| async { Ok(U256::from(100)) },
            |fee, _gas| async move {
                if fee >= threshold {
                    Ok(())
                } else {
                    Err(BridgeError::Rpc("revert: INSUFFICIENT_FEE".into()))
                }
            },
            &tight_schedule(),
            &sink,
        )
        .await
        .unwrap();
        let seen = phases.lock().unwrap().clone();
        assert_eq!(seen[0], DispatchPhase::Quote);
        assert!(seen.contains(&DispatchPhase::Simulate));
    }
}
