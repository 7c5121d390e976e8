//! HTTP facade over the write path
//!
//! Four routes: submit an entry, fetch the latest checkpoint, fetch a tile,
//! fetch an entry bundle. All tree verification happens client-side from
//! those artifacts.

mod error;
mod handlers;
mod router;
mod state;

pub use router::create_router;
pub use state::{AppState, Latency};
