// Route planning module
// Route/quote data model and the direct-vs-hub fee planner
//
// Numan Thabit 2025 Nov

pub mod planner;
pub mod routes;

pub use planner::{Planner, QuoteSequencer, RouteQuery, WiringHealth};
pub use routes::{Route, RouteKind, RouteLeg, SwapQuote};
