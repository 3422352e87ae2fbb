//! # Scrobd Common Library
//!
//! Shared code for the scrobd media-activity tracker:
//! - Media catalog types (MediaKind, MediaRef, TrackableMedia)
//! - Database schema and queries (scrobbles, media, users, import jobs)
//! - Reconciliation policy (per-kind completion / grace / staleness)
//! - Event types (ScrobbleEvent enum) and EventBus
//! - Clock capability for deterministic time in tests
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod media;
pub mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use media::{MediaKind, MediaRef, TrackableMedia};
pub use policy::ReconciliationPolicy;
