// Library root module for hopbridge
// This file defines the public API and module structure for the hopbridge library
// It exports the main functionality that can be used by other crates
//
// Numan Thabit 2025 Nov

pub mod abi;
pub mod amm;
pub mod api;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod escrow;
pub mod metrics;
pub mod reconcile;
pub mod reserves;
pub mod router;
pub mod tokens;
pub mod transport;
