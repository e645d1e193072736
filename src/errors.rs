// Error types and error handling module
// This file defines the categorized error taxonomy used across the
// hopbridge engine so callers can branch without parsing revert strings
//
// Numan Thabit 2025 Nov

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Router/escrow/peer configuration pointers are inconsistent.
    #[error("WIRING: {0}")]
    Wiring(String),
    /// Destination escrow cannot cover the minimum payout.
    #[error("LIQUIDITY: {0}")]
    Liquidity(String),
    /// Order-creation simulation or transaction reverted.
    #[error("CREATE: {0}")]
    Create(String),
    /// Fee/gas underquote, authorization failure, or bad on-chain state.
    #[error("DISPATCH: {0}")]
    Dispatch(String),
    /// Transient network or node failure.
    #[error("RPC: {0}")]
    Rpc(String),
    /// A per-attempt timeout elapsed.
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    /// Unknown token, chain, or pair.
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),
}

impl BridgeError {
    /// Transient errors are worth retrying with backoff; everything else
    /// is raised to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Rpc(_) | BridgeError::Timeout(_))
    }
}
