// Configuration management module
// This file handles loading of engine settings from environment
// variables plus the built-in per-chain deployment table
//
// Numan Thabit 2025 Nov

use crate::errors::BridgeError;
use alloy_primitives::{address, Address};
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP API bind address, defaults to 0.0.0.0:8080
    pub bind_addr: Option<String>,
    /// Override for the fixed hub chain id
    pub hub_chain_id: Option<u64>,
    /// Concurrency control for the API surface
    pub max_inflight: Option<usize>,
    /// Address submitting transactions through the wallet provider
    pub maker_address: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

/// Static deployment facts for one chain: ids, contracts, default RPCs.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: &'static str,
    /// Message-bus endpoint id; distinct from the chain id.
    pub endpoint_id: u32,
    /// Built-in default RPC URLs, best first.
    pub default_rpc_urls: Vec<String>,
    pub escrow: Address,
    pub router: Address,
    pub amm: Address,
    pub wrapped_native: Address,
    pub stable: Address,
    pub price_oracle: Address,
}

/// Per-chain deployment registry plus the fixed hub chain.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainConfig>,
    hub_chain_id: u64,
}

pub const SEPOLIA: u64 = 11155111;
pub const ARB_SEPOLIA: u64 = 421614;
pub const BASE_SEPOLIA: u64 = 84532;

impl ChainRegistry {
    /// Built-in testnet deployments. The hub defaults to Sepolia and can
    /// be overridden through `AppConfig::hub_chain_id`.
    pub fn builtin(hub_override: Option<u64>) -> Self {
        let mut chains = HashMap::new();
        chains.insert(
            SEPOLIA,
            ChainConfig {
                chain_id: SEPOLIA,
                name: "sepolia",
                endpoint_id: 40161,
                default_rpc_urls: vec![
                    "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                    "https://rpc.sepolia.org".to_string(),
                    "https://1rpc.io/sepolia".to_string(),
                ],
                escrow: address!("4e5c73c723217c7b951b2bcf0e78bd37a99ab7a1"),
                router: address!("6a2bd44aa9e10b2acd77c9b4d8eaf0451cbe4111"),
                amm: address!("8c3f2c2084f08e3a3ca37a25e5f9f9a27e5d6a21"),
                wrapped_native: address!("fFf9976782d46CC05630D1f6eBAb18b2324d6B14"),
                stable: address!("1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
                price_oracle: address!("694AA1769357215DE4FAC081bf1f309aDC325306"),
            },
        );
        chains.insert(
            ARB_SEPOLIA,
            ChainConfig {
                chain_id: ARB_SEPOLIA,
                name: "arbitrum-sepolia",
                endpoint_id: 40231,
                default_rpc_urls: vec![
                    "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
                    "https://arbitrum-sepolia-rpc.publicnode.com".to_string(),
                ],
                escrow: address!("91b5a7a5a1ce1a9242bc9c4c6e2b57cc0481d4c2"),
                router: address!("2d5a4f1ca3bb7e9d4c08bd16ac9e3f2b64528dd2"),
                amm: address!("7b1fb6ae8c2d1cc0b7244aacd2e41d83e55c9ad3"),
                wrapped_native: address!("980B62Da83eFf3D4576C647993b0c1D7faf17c73"),
                stable: address!("75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
                price_oracle: address!("0153002d20B96532C639313c2d54c3dA09109309"),
            },
        );
        chains.insert(
            BASE_SEPOLIA,
            ChainConfig {
                chain_id: BASE_SEPOLIA,
                name: "base-sepolia",
                endpoint_id: 40245,
                default_rpc_urls: vec![
                    "https://sepolia.base.org".to_string(),
                    "https://base-sepolia-rpc.publicnode.com".to_string(),
                ],
                escrow: address!("a61e7bd57b93eb2e90218e89eb26b661e2a75c43"),
                router: address!("b27dd1e65c5c4e5a9edc3e8a14ab4c9e3f2d6354"),
                amm: address!("c38ee2f76d6d5f6b0fed4f9b25bc5daf40317465"),
                wrapped_native: address!("4200000000000000000000000000000000000006"),
                stable: address!("036CbD53842c5426634e7929541eC2318f3dCF7e"),
                price_oracle: address!("4aDC67696bA383F43DD60A9e78F2C97Fbbfc7cb1"),
            },
        );
        Self {
            chains,
            hub_chain_id: hub_override.unwrap_or(SEPOLIA),
        }
    }

    pub fn hub_chain_id(&self) -> u64 {
        self.hub_chain_id
    }

    pub fn chain(&self, chain_id: u64) -> Result<&ChainConfig, BridgeError> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| BridgeError::Unsupported(format!("unknown chain id {chain_id}")))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Env-supplied RPC fallbacks: `RPC_FALLBACKS_<chain_id>` holds a
    /// comma-separated URL list inserted between the primary and the
    /// built-in defaults.
    pub fn env_fallbacks(chain_id: u64) -> Vec<String> {
        std::env::var(format!("RPC_FALLBACKS_{chain_id}"))
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
