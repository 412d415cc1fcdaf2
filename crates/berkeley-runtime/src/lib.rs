//! Berkeley Runtime - Coordinator cycle and client round
//!
//! Coordinator cycle:
//! 1. Accept clients within the accept budget
//! 2. Request each client's time concurrently
//! 3. Join every handler
//! 4. Filter outliers, compute the consensus
//! 5. Deliver per-client adjustments
//! 6. Adjust the coordinator's virtual clock
//!
//! Offsets persist between runs through an [`OffsetStore`].

pub mod aggregator;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod report;
pub mod store;

pub use aggregator::*;
pub use client::*;
pub use config::*;
pub use coordinator::*;
pub use logging::*;
pub use report::*;
pub use store::*;
