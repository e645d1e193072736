// Delivery and status reconciliation
// Answers "did my dispatch land?" from on-chain facts alone: the source
// receipt for the dispatch transaction, and a bounded destination log
// scan for the delivered payload
//
// Numan Thabit 2025 Nov

use crate::abi::{decode_execute_payload, IBusRouter};
use crate::endpoint::EndpointResolver;
use crate::errors::BridgeError;
use crate::transport::jsonrpc::{LogFilter, RpcLog, RpcReader};
use crate::transport::retry::{with_retries, RetryPolicy};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use serde::Serialize;
use tracing::{debug, info};

pub use crate::escrow::order::OrderStatus;
pub use crate::escrow::preflight::{check_wiring, WiringCheck};

/// Source-side verdict on a transaction, distinguishing "not yet mined"
/// from "mined and reverted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum SourceStatus {
    Pending,
    Confirmed { block_number: u64 },
    Failed { block_number: u64 },
}

#[derive(Debug, Clone)]
pub struct DeliveryQuery {
    pub to_chain: u64,
    pub recipient: Address,
    /// Narrow the match to one order when known.
    pub order_id: Option<U256>,
    /// Scan no earlier than this block.
    pub min_block: u64,
    /// Scan at most this many blocks back from the destination head.
    pub max_lookback: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMatch {
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub nonce: u64,
    pub order_id: U256,
    pub recipient: Address,
    pub min_amount_out: U256,
}

/// Scan result summary: the window actually inspected and the match, if
/// any. Absence of a match is not proof of failure, only of no delivery
/// inside the window.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryProbe {
    pub scanned_from: u64,
    pub scanned_to: u64,
    pub delivery: Option<DeliveryMatch>,
}

pub struct Reconciler {
    resolver: EndpointResolver,
}

impl Reconciler {
    pub fn new(resolver: EndpointResolver) -> Self {
        Self { resolver }
    }

    pub async fn source_status(
        &self,
        chain_id: u64,
        tx_hash: B256,
    ) -> Result<SourceStatus, BridgeError> {
        let rpc = self.resolver.resolve(chain_id).await?;
        let receipt = with_retries(|| rpc.transaction_receipt(tx_hash), RetryPolicy::quick())
            .await?;
        Ok(match receipt {
            None => SourceStatus::Pending,
            Some(receipt) if receipt.status => SourceStatus::Confirmed {
                block_number: receipt.block_number,
            },
            Some(receipt) => SourceStatus::Failed {
                block_number: receipt.block_number,
            },
        })
    }

    /// Bounded scan of the destination router's delivered-payload logs.
    pub async fn find_delivery(&self, query: &DeliveryQuery) -> Result<DeliveryProbe, BridgeError> {
        let router = self.resolver.registry().chain(query.to_chain)?.router;
        let rpc = self.resolver.resolve(query.to_chain).await?;
        let latest = rpc.block_number().await?;
        let from_block = latest.saturating_sub(query.max_lookback).max(query.min_block);

        let filter = LogFilter {
            address: router,
            topic0: IBusRouter::PayloadDelivered::SIGNATURE_HASH,
            from_block,
            to_block: latest,
        };
        let logs = with_retries(|| rpc.get_logs(&filter), RetryPolicy::quick()).await?;
        debug!(
            to_chain = query.to_chain,
            from_block = from_block,
            to_block = latest,
            logs = logs.len(),
            "delivery window scanned"
        );

        let delivery = match_delivery(&logs, query.recipient, query.order_id);
        if let Some(found) = &delivery {
            info!(
                order_id = %found.order_id,
                recipient = %found.recipient,
                nonce = found.nonce,
                "delivery confirmed on destination"
            );
        }
        Ok(DeliveryProbe {
            scanned_from: from_block,
            scanned_to: latest,
            delivery,
        })
    }
}

/// Collapse on-chain observations into the order lifecycle state. The
/// chain owns the real state; this is the read-side projection of what
/// was observed so far.
pub fn derive_order_status(
    cancelled: bool,
    dispatch: Option<SourceStatus>,
    delivered: bool,
) -> OrderStatus {
    if cancelled {
        return OrderStatus::Cancelled;
    }
    if delivered {
        return OrderStatus::Executed;
    }
    match dispatch {
        Some(SourceStatus::Confirmed { .. }) => OrderStatus::Dispatched,
        _ => OrderStatus::Created,
    }
}

/// Pure matcher over scanned logs: decode each delivered payload and
/// keep the most recent one addressed to the recipient (and order id,
/// when given). Undecodable logs are skipped, not errors; other traffic
/// shares the same event.
pub fn match_delivery(
    logs: &[RpcLog],
    recipient: Address,
    order_id: Option<U256>,
) -> Option<DeliveryMatch> {
    logs.iter()
        .filter_map(|log| {
            let event = IBusRouter::PayloadDelivered::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
                true,
            )
            .ok()?;
            let (payload_order, payload_to, min_out) = decode_execute_payload(&event.payload)?;
            if payload_to != recipient {
                return None;
            }
            if let Some(wanted) = order_id {
                if payload_order != wanted {
                    return None;
                }
            }
            Some(DeliveryMatch {
                block_number: log.block_number,
                tx_hash: log.transaction_hash,
                nonce: event.nonce,
                order_id: payload_order,
                recipient: payload_to,
                min_amount_out: min_out,
            })
        })
        .max_by_key(|m| m.block_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::encode_execute_payload;
    use alloy_primitives::{address, Bytes};
    use alloy_sol_types::SolValue;

    fn delivered_log(
        order_id: u64,
        recipient: Address,
        nonce: u64,
        block: u64,
    ) -> RpcLog {
        let payload = encode_execute_payload(
            U256::from(order_id),
            recipient,
            U256::from(1_000u64),
        );
        RpcLog {
            address: address!("00000000000000000000000000000000000000b0"),
            topics: vec![
                IBusRouter::PayloadDelivered::SIGNATURE_HASH,
                B256::from(U256::from(40161u64)),
                B256::ZERO,
            ],
            data: Bytes::from((nonce, Bytes::from(payload.to_vec())).abi_encode_params()),
            block_number: Some(block),
            transaction_hash: Some(B256::from(U256::from(block))),
        }
    }

    const ALICE: Address = address!("00000000000000000000000000000000000000a1");
    const BOB: Address = address!("00000000000000000000000000000000000000b2");

    #[test]
    fn matches_recipient_and_skips_others() {
        let logs = vec![
            delivered_log(1, BOB, 10, 100),
            delivered_log(2, ALICE, 11, 101),
        ];
        let found = match_delivery(&logs, ALICE, None).unwrap();
        assert_eq!(found.order_id, U256::from(2));
        assert_eq!(found.nonce, 11);
        assert!(match_delivery(&logs, Address::ZERO, None).is_none());
    }

    #[test]
    fn order_id_filter_narrows_the_match() {
        let logs = vec![
            delivered_log(5, ALICE, 1, 100),
            delivered_log(6, ALICE, 2, 101),
        ];
        let found = match_delivery(&logs, ALICE, Some(U256::from(5))).unwrap();
        assert_eq!(found.order_id, U256::from(5));
        assert!(match_delivery(&logs, ALICE, Some(U256::from(9))).is_none());
    }

    #[test]
    fn most_recent_delivery_wins() {
        let logs = vec![
            delivered_log(7, ALICE, 1, 100),
            delivered_log(7, ALICE, 2, 105),
        ];
        let found = match_delivery(&logs, ALICE, Some(U256::from(7))).unwrap();
        assert_eq!(found.block_number, Some(105));
        assert_eq!(found.nonce, 2);
    }

    #[test]
    fn status_projection_follows_observation_order() {
        let confirmed = Some(SourceStatus::Confirmed { block_number: 10 });
        assert_eq!(
            derive_order_status(false, None, false),
            OrderStatus::Created
        );
        assert_eq!(
            derive_order_status(false, Some(SourceStatus::Pending), false),
            OrderStatus::Created
        );
        assert_eq!(
            derive_order_status(false, confirmed, false),
            OrderStatus::Dispatched
        );
        assert_eq!(
            derive_order_status(false, confirmed, true),
            OrderStatus::Executed
        );
        assert_eq!(
            derive_order_status(true, confirmed, false),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn undecodable_payloads_are_skipped() {
        let mut garbage = delivered_log(1, ALICE, 1, 100);
        garbage.data = Bytes::from(vec![0xde, 0xad]);
        let logs = vec![garbage, delivered_log(3, ALICE, 2, 101)];
        let found = match_delivery(&logs, ALICE, None).unwrap();
        assert_eq!(found.order_id, U256::from(3));
    }
}
