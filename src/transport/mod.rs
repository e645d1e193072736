// Transport layer module
// JSON-RPC client for chain nodes, the generic retry wrapper, and the
// injected wallet/signer capability
//
// Numan Thabit 2025 Nov

pub mod jsonrpc;
pub mod retry;
pub mod wallet;
