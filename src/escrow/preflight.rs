// Preflight checks before value-bearing calls
// The escrow/router mutual-configuration check is two independently read
// configuration values validated for consistency once per preflight, not
// a live object cycle; it is recomputed fresh before every dispatch
//
// Numan Thabit 2025 Nov

use crate::abi::{IBusRouter, IEscrow};
use crate::errors::BridgeError;
use crate::transport::jsonrpc::RpcReader;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use tracing::debug;

/// Point-in-time consistency snapshot across the on-chain configuration
/// pointers. Never cached long-term: misconfiguration must be caught
/// freshly before value-bearing calls.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WiringCheck {
    pub escrow_router_ok: bool,
    pub router_peer_ok: bool,
    pub router_escrow_ok: bool,
}

impl WiringCheck {
    pub fn all_ok(&self) -> bool {
        self.escrow_router_ok && self.router_peer_ok && self.router_escrow_ok
    }

    /// Name the first failing pointer for the error message.
    pub fn failing_pointer(&self) -> Option<&'static str> {
        if !self.escrow_router_ok {
            Some("escrow.router does not match the expected router")
        } else if !self.router_peer_ok {
            Some("router has no peer binding for the destination endpoint")
        } else if !self.router_escrow_ok {
            Some("router.escrow does not point back at this escrow")
        } else {
            None
        }
    }
}

pub async fn check_wiring<R: RpcReader>(
    rpc: &R,
    escrow: Address,
    expected_router: Address,
    dst_eid: u32,
) -> Result<WiringCheck, BridgeError> {
    let escrow_router_data = Bytes::from(IEscrow::routerCall {}.abi_encode());
    let peers_data = Bytes::from(IBusRouter::peersCall { eid: dst_eid }.abi_encode());
    let router_escrow_data = Bytes::from(IBusRouter::escrowCall {}.abi_encode());

    let (escrow_router_raw, peer_raw, router_escrow_raw) = tokio::join!(
        rpc.call(escrow, escrow_router_data),
        rpc.call(expected_router, peers_data),
        rpc.call(expected_router, router_escrow_data),
    );

    let configured_router = IEscrow::routerCall::abi_decode_returns(&escrow_router_raw?, true)
        .map_err(|e| BridgeError::Rpc(format!("decode escrow.router: {e}")))?
        ._0;
    let peer = IBusRouter::peersCall::abi_decode_returns(&peer_raw?, true)
        .map_err(|e| BridgeError::Rpc(format!("decode router.peers: {e}")))?
        ._0;
    let configured_escrow = IBusRouter::escrowCall::abi_decode_returns(&router_escrow_raw?, true)
        .map_err(|e| BridgeError::Rpc(format!("decode router.escrow: {e}")))?
        ._0;

    let check = WiringCheck {
        escrow_router_ok: configured_router == expected_router,
        router_peer_ok: peer != B256::ZERO,
        router_escrow_ok: configured_escrow == escrow,
    };
    debug!(
        escrow = %escrow,
        router = %expected_router,
        dst_eid = dst_eid,
        escrow_router_ok = check.escrow_router_ok,
        router_peer_ok = check.router_peer_ok,
        router_escrow_ok = check.router_escrow_ok,
        "wiring cross-checked"
    );
    Ok(check)
}

/// For same-asset native bridging the destination escrow must hold at
/// least the minimum payout; the shortfall is named exactly.
pub async fn check_destination_liquidity<R: RpcReader>(
    dst_rpc: &R,
    dst_escrow: Address,
    min_amount_out: U256,
) -> Result<(), BridgeError> {
    let balance = dst_rpc.balance(dst_escrow).await?;
    if balance < min_amount_out {
        let shortfall = min_amount_out - balance;
        return Err(BridgeError::Liquidity(format!(
            "destination escrow {dst_escrow} holds {balance} wei, needs {min_amount_out} wei (short {shortfall} wei)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_pointer_names_first_break() {
        let ok = WiringCheck {
            escrow_router_ok: true,
            router_peer_ok: true,
            router_escrow_ok: true,
        };
        assert!(ok.all_ok());
        assert_eq!(ok.failing_pointer(), None);

        let broken = WiringCheck {
            escrow_router_ok: true,
            router_peer_ok: false,
            router_escrow_ok: false,
        };
        assert!(!broken.all_ok());
        assert_eq!(
            broken.failing_pointer(),
            Some("router has no peer binding for the destination endpoint")
        );
    }
}
