//! Scrobd server library
//!
//! Webhook ingestion, event normalization, the scrobble reconciliation engine,
//! import batch processors, and background jobs. The binary in `main.rs` wires
//! these together; integration tests drive the router directly.

pub mod api;
pub mod engine;
pub mod error;
pub mod imports;
pub mod jobs;
pub mod normalize;
