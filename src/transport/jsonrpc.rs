// JSON-RPC transport layer implementation
// This file implements the JSON-RPC client for EVM chain nodes and the
// read interface the caches and simulators are written against
//
// Numan Thabit 2025 Nov

use crate::abi::decode_revert;
use crate::errors::BridgeError;
use crate::metrics::{RPC_ERRORS, RPC_LATENCY};
use alloy_primitives::{Address, Bytes, B256, U256};
use reqwest::Client;
use serde_json::{json, Value};

/// Read interface against one chain. The concrete client is `EvmRpc`;
/// tests inject fakes.
#[allow(async_fn_in_trait)]
pub trait RpcReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, BridgeError>;

    /// `eth_call` with an explicit sender and attached value, used for
    /// dry-run simulation of value-bearing calls.
    async fn call_from(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<Bytes, BridgeError>;

    async fn balance(&self, address: Address) -> Result<U256, BridgeError>;
    async fn block_number(&self) -> Result<u64, BridgeError>;
    async fn get_code(&self, address: Address) -> Result<Bytes, BridgeError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, BridgeError>;
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone)]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub status: bool,
    pub logs: Vec<RpcLog>,
}

#[derive(Debug, Clone)]
pub struct EvmRpc {
    http: Client,
    url: String,
    /// Metrics label, normally the chain id.
    label: String,
}

impl EvmRpc {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            http: Client::new(),
            label: url.clone(),
            url,
        }
    }

    pub fn labeled(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            label: label.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Raw JSON-RPC 2.0 request. Node errors are surfaced as
    /// `BridgeError::Rpc` with any `Error(string)` revert data decoded
    /// into the message so callers can translate it.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let timer = RPC_LATENCY
            .with_label_values(&[&self.label, method])
            .start_timer();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let result = self.request_inner(method, payload).await;
        timer.observe_duration();
        if result.is_err() {
            RPC_ERRORS.with_label_values(&[&self.label, method]).inc();
        }
        result
    }

    async fn request_inner(&self, method: &str, payload: Value) -> Result<Value, BridgeError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::Rpc(format!("{method} send: {e}")))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Rpc(format!("{method} http {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::Rpc(format!("{method} json parse: {e}")))?;
        if let Some(err) = body.get("error") {
            let mut message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("node error")
                .to_string();
            if let Some(reason) = err
                .get("data")
                .and_then(Value::as_str)
                .and_then(parse_hex_bytes)
                .and_then(|raw| decode_revert(&raw))
            {
                message = format!("{message}; revert: {reason}");
            }
            return Err(BridgeError::Rpc(format!("{method}: {message}")));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| BridgeError::Rpc(format!("{method}: missing result")))
    }
}

impl RpcReader for EvmRpc {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, BridgeError> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": to.to_string(), "data": data.to_string() }, "latest"]),
            )
            .await?;
        parse_bytes(&result, "eth_call")
    }

    async fn call_from(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<Bytes, BridgeError> {
        let result = self
            .request(
                "eth_call",
                json!([{
                    "from": from.to_string(),
                    "to": to.to_string(),
                    "data": data.to_string(),
                    "value": format!("{value:#x}"),
                }, "latest"]),
            )
            .await?;
        parse_bytes(&result, "eth_call")
    }

    async fn balance(&self, address: Address) -> Result<U256, BridgeError> {
        let result = self
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        parse_quantity(&result, "eth_getBalance")
    }

    async fn block_number(&self) -> Result<u64, BridgeError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(&result, "eth_blockNumber")?.to::<u64>())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, BridgeError> {
        let result = self
            .request("eth_getCode", json!([address.to_string(), "latest"]))
            .await?;
        parse_bytes(&result, "eth_getCode")
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, BridgeError> {
        let result = self
            .request(
                "eth_getLogs",
                json!([{
                    "address": filter.address.to_string(),
                    "topics": [filter.topic0.to_string()],
                    "fromBlock": format!("{:#x}", filter.from_block),
                    "toBlock": format!("{:#x}", filter.to_block),
                }]),
            )
            .await?;
        let entries = result
            .as_array()
            .ok_or_else(|| BridgeError::Rpc("eth_getLogs: result not an array".into()))?;
        entries.iter().map(parse_log).collect()
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, BridgeError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let logs = result
            .get("logs")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().map(parse_log).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Some(RpcReceipt {
            transaction_hash: hash,
            block_number: result
                .get("blockNumber")
                .map(|v| parse_quantity(v, "receipt.blockNumber"))
                .transpose()?
                .map(|v| v.to::<u64>())
                .unwrap_or_default(),
            status: result
                .get("status")
                .and_then(Value::as_str)
                .map(|s| s == "0x1")
                .unwrap_or(false),
            logs,
        }))
    }
}

fn parse_hex_bytes(raw: &str) -> Option<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x")).ok()
}

fn parse_bytes(value: &Value, context: &str) -> Result<Bytes, BridgeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BridgeError::Rpc(format!("{context}: result not a string")))?;
    parse_hex_bytes(raw)
        .map(Bytes::from)
        .ok_or_else(|| BridgeError::Rpc(format!("{context}: bad hex")))
}

fn parse_quantity(value: &Value, context: &str) -> Result<U256, BridgeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BridgeError::Rpc(format!("{context}: result not a string")))?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| BridgeError::Rpc(format!("{context}: bad quantity: {e}")))
}

fn parse_b256(value: &Value) -> Option<B256> {
    value.as_str()?.parse().ok()
}

fn parse_log(entry: &Value) -> Result<RpcLog, BridgeError> {
    let address = entry
        .get("address")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BridgeError::Rpc("log: bad address".into()))?;
    let topics = entry
        .get("topics")
        .and_then(Value::as_array)
        .map(|ts| ts.iter().filter_map(parse_b256).collect())
        .unwrap_or_default();
    let data = entry
        .get("data")
        .map(|v| parse_bytes(v, "log.data"))
        .transpose()?
        .unwrap_or_default();
    Ok(RpcLog {
        address,
        topics,
        data,
        block_number: entry
            .get("blockNumber")
            .map(|v| parse_quantity(v, "log.blockNumber"))
            .transpose()?
            .map(|v| v.to::<u64>()),
        transaction_hash: entry.get("transactionHash").and_then(parse_b256),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_and_bytes_parsing() {
        let v = json!("0x2a");
        assert_eq!(parse_quantity(&v, "t").unwrap(), U256::from(42));
        let b = json!("0xdeadbeef");
        assert_eq!(
            parse_bytes(&b, "t").unwrap(),
            Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert!(parse_quantity(&json!(7), "t").is_err());
    }

    #[test]
    fn log_parsing() {
        let entry = json!({
            "address": "0x1111111111111111111111111111111111111111",
            "topics": [
                "0x00000000000000000000000000000000000000000000000000000000000000aa"
            ],
            "data": "0x0102",
            "blockNumber": "0x10",
            "transactionHash":
                "0x00000000000000000000000000000000000000000000000000000000000000bb"
        });
        let log = parse_log(&entry).unwrap();
        assert_eq!(log.topics.len(), 1);
        assert_eq!(log.block_number, Some(16));
        assert_eq!(log.data.as_ref(), &[0x01, 0x02]);
    }
}
