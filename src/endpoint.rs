// Endpoint resolver and RPC race layer
// Merges candidate URL lists, races them with a liveness probe, and
// caches the winner per chain with stale-while-revalidate refresh
//
// Numan Thabit 2025 Nov

use crate::config::ChainRegistry;
use crate::errors::BridgeError;
use crate::transport::jsonrpc::{EvmRpc, RpcReader};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Merge candidate URLs preserving order (primary, then extras, then
/// defaults) and deduplicating on first occurrence. An empty merged list
/// is a configuration error.
pub fn merge_rpc_urls(
    primary: Option<&str>,
    extras: &[String],
    defaults: &[String],
) -> Result<Vec<String>, BridgeError> {
    let mut merged: Vec<String> = Vec::new();
    let mut push = |url: &str| {
        let url = url.trim();
        if !url.is_empty() && !merged.iter().any(|u| u == url) {
            merged.push(url.to_string());
        }
    };
    if let Some(url) = primary {
        push(url);
    }
    for url in extras {
        push(url);
    }
    for url in defaults {
        push(url);
    }
    if merged.is_empty() {
        return Err(BridgeError::Unsupported(
            "no rpc urls configured for chain".into(),
        ));
    }
    Ok(merged)
}

struct CachedEndpoint {
    client: EvmRpc,
    cached_at: Instant,
}

struct Inner {
    registry: ChainRegistry,
    cache: RwLock<HashMap<u64, CachedEndpoint>>,
    probe_timeout: Duration,
    refresh_after: Duration,
}

/// Resolves the best live RPC client per chain. Cached entries are
/// replaced whole; a stale entry is served immediately while a background
/// re-race refreshes it.
#[derive(Clone)]
pub struct EndpointResolver {
    inner: Arc<Inner>,
}

impl EndpointResolver {
    pub fn new(registry: ChainRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cache: RwLock::new(HashMap::new()),
                probe_timeout: Duration::from_millis(2500),
                refresh_after: Duration::from_secs(600),
            }),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.inner.registry
    }

    fn candidates(&self, chain_id: u64) -> Result<Vec<String>, BridgeError> {
        let chain = self.inner.registry.chain(chain_id)?;
        merge_rpc_urls(
            chain.default_rpc_urls.first().map(String::as_str),
            &ChainRegistry::env_fallbacks(chain_id),
            &chain.default_rpc_urls,
        )
    }

    /// Resolve a client for `chain_id`. Callers always get *a* client:
    /// if every probe fails the first configured URL is returned and the
    /// retry wrapper takes over resilience.
    pub async fn resolve(&self, chain_id: u64) -> Result<EvmRpc, BridgeError> {
        {
            let cache = self.inner.cache.read().await;
            if let Some(entry) = cache.get(&chain_id) {
                let client = entry.client.clone();
                if entry.cached_at.elapsed() > self.inner.refresh_after {
                    self.spawn_background_refresh(chain_id);
                }
                return Ok(client);
            }
        }
        let client = self.race(chain_id).await?;
        let mut cache = self.inner.cache.write().await;
        cache.insert(
            chain_id,
            CachedEndpoint {
                client: client.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(client)
    }

    pub async fn clear(&self, chain_id: Option<u64>) {
        let mut cache = self.inner.cache.write().await;
        match chain_id {
            Some(id) => {
                cache.remove(&id);
            }
            None => cache.clear(),
        }
    }

    pub async fn cached_chains(&self) -> usize {
        self.inner.cache.read().await.len()
    }

    fn spawn_background_refresh(&self, chain_id: u64) {
        let resolver = self.clone();
        tokio::spawn(async move {
            match resolver.race(chain_id).await {
                Ok(client) => {
                    let mut cache = resolver.inner.cache.write().await;
                    cache.insert(
                        chain_id,
                        CachedEndpoint {
                            client,
                            cached_at: Instant::now(),
                        },
                    );
                    debug!(chain_id = chain_id, "endpoint cache refreshed");
                }
                Err(err) => {
                    warn!(chain_id = chain_id, error = %err, "background endpoint refresh failed");
                }
            }
        });
    }

    /// Race all candidates with a block-number liveness probe under a
    /// bounded per-candidate timeout; first success wins, losers are
    /// abandoned when the unordered set is dropped.
    async fn race(&self, chain_id: u64) -> Result<EvmRpc, BridgeError> {
        let urls = self.candidates(chain_id)?;
        let label = chain_id.to_string();
        let probe_timeout = self.inner.probe_timeout;
        let mut probes: FuturesUnordered<_> = urls
            .iter()
            .map(|url| {
                let client = EvmRpc::labeled(url.clone(), label.clone());
                async move {
                    let probe = tokio::time::timeout(probe_timeout, client.block_number()).await;
                    match probe {
                        Ok(Ok(block)) => Some((client, block)),
                        _ => None,
                    }
                }
            })
            .collect();
        while let Some(outcome) = probes.next().await {
            if let Some((client, block)) = outcome {
                info!(
                    chain_id = chain_id,
                    endpoint = %client.endpoint(),
                    block = block,
                    "endpoint race won"
                );
                return Ok(client);
            }
        }
        warn!(
            chain_id = chain_id,
            fallback = %urls[0],
            "all endpoint probes failed; falling back to first configured url"
        );
        Ok(EvmRpc::labeled(urls[0].clone(), label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_preserves_order_and_dedupes() {
        let merged = merge_rpc_urls(
            Some("https://a"),
            &urls(&["https://b", "https://a"]),
            &urls(&["https://c", "https://b", "https://a"]),
        )
        .unwrap();
        assert_eq!(merged, urls(&["https://a", "https://b", "https://c"]));
    }

    #[test]
    fn merge_without_primary() {
        let merged = merge_rpc_urls(None, &urls(&["https://x"]), &urls(&["https://y"])).unwrap();
        assert_eq!(merged, urls(&["https://x", "https://y"]));
    }

    #[test]
    fn merge_rejects_empty_result() {
        let result = merge_rpc_urls(None, &[], &urls(&["", "  "]));
        assert!(matches!(result, Err(BridgeError::Unsupported(_))));
    }
}
