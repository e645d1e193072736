// Contract call surface and payload codecs
// This file defines the fixed ABIs of the escrow, message-bus router,
// AMM, ERC20, and price oracle contracts, plus the execute-payload codec
// shared by dispatch and delivery reconciliation
//
// Numan Thabit 2025 Nov

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolValue};

sol! {
    /// Source-chain escrow holding funds until cross-chain execution.
    interface IEscrow {
        function createOrder(
            address tokenIn,
            address tokenOut,
            uint256 amountIn,
            uint256 minAmountOut,
            uint32 dstEid
        ) external payable returns (uint256 orderId);

        function dispatchToDst(
            uint256 orderId,
            bytes32 recipient,
            uint256 minAmountOut,
            bytes options
        ) external payable;

        function cancelOrder(uint256 orderId) external;

        function nextOrderId() external view returns (uint256);
        function router() external view returns (address);

        event OrderCreated(
            uint256 indexed orderId,
            address indexed maker,
            address tokenIn,
            address tokenOut,
            uint256 amountIn,
            uint256 minAmountOut,
            uint32 dstEid
        );
        event OrderCancelled(uint256 indexed orderId);
    }

    /// Message-bus router; one deployment per chain.
    interface IBusRouter {
        function quote(
            uint32 dstEid,
            bytes payload,
            bytes options,
            bool payInAlt
        ) external view returns (uint256 nativeFee, uint256 altFee);

        function peers(uint32 eid) external view returns (bytes32);
        function escrow() external view returns (address);

        event PayloadDelivered(
            uint32 indexed srcEid,
            bytes32 indexed sender,
            uint64 nonce,
            bytes payload
        );
    }

    /// Destination AMM pool (one native/wrapped-native asset, one stable).
    interface IAmm {
        function getSwapQuote(
            address tokenIn,
            address tokenOut,
            uint256 amountIn
        ) external view returns (uint256 amountOut, uint256 priceImpactBps);

        function getReserves() external view returns (uint256 reserveNative, uint256 reserveStable);
        function feeBps() external view returns (uint256);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IPriceOracle {
        function latestRoundData()
            external
            view
            returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound);
        function decimals() external view returns (uint8);
    }
}

/// Encode the execute payload carried by the bridge message.
/// Fixed-width words only, so the encoding is injective over its inputs.
pub fn encode_execute_payload(order_id: U256, to: Address, min_out: U256) -> Bytes {
    Bytes::from((order_id, to, min_out).abi_encode())
}

/// Decode an execute payload back into (order id, recipient, min out).
pub fn decode_execute_payload(data: &[u8]) -> Option<(U256, Address, U256)> {
    <(U256, Address, U256)>::abi_decode(data, true).ok()
}

/// Executor options blob: version word followed by the destination gas
/// budget. The router treats this as opaque; only the relay reads it.
pub fn encode_gas_options(gas_budget: u64) -> Bytes {
    Bytes::from((1u16, gas_budget as u128).abi_encode())
}

/// Selector for `Error(string)` revert data.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Extract a human-readable reason from `Error(string)` revert data.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    <String>::abi_decode(&data[4..], true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn execute_payload_is_injective() {
        let to = address!("1111111111111111111111111111111111111111");
        let base = encode_execute_payload(U256::from(7), to, U256::from(100));
        assert_eq!(
            base,
            encode_execute_payload(U256::from(7), to, U256::from(100))
        );
        assert_ne!(
            base,
            encode_execute_payload(U256::from(8), to, U256::from(100))
        );
        assert_ne!(
            base,
            encode_execute_payload(
                U256::from(7),
                address!("2222222222222222222222222222222222222222"),
                U256::from(100)
            )
        );
        assert_ne!(
            base,
            encode_execute_payload(U256::from(7), to, U256::from(101))
        );
    }

    #[test]
    fn execute_payload_round_trips() {
        let to = address!("3333333333333333333333333333333333333333");
        let encoded = encode_execute_payload(U256::from(42), to, U256::from(999));
        let (id, rec, min_out) = decode_execute_payload(&encoded).unwrap();
        assert_eq!(id, U256::from(42));
        assert_eq!(rec, to);
        assert_eq!(min_out, U256::from(999));
    }

    #[test]
    fn revert_reason_decodes() {
        // Error("INSUFFICIENT_FEE") as produced by solc
        let reason = "INSUFFICIENT_FEE".to_string();
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(reason.abi_encode());
        assert_eq!(decode_revert(&data).as_deref(), Some("INSUFFICIENT_FEE"));
        assert_eq!(decode_revert(&[0x12, 0x34]), None);
    }
}
