// Escrow order lifecycle module
// Order creation, preflight wiring/liquidity checks, the fee-adaptive
// dispatch loop, and cancellation
//
// Numan Thabit 2025 Nov

pub mod dispatch;
pub mod order;
pub mod preflight;

pub use dispatch::{DispatchEvent, DispatchPhase, FeeSchedule};
pub use order::{CreateOrderRequest, EscrowEngine, OrderHandle, OrderStatus};
pub use preflight::{check_wiring, WiringCheck};
