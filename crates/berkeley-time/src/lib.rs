//! Berkeley Time Engine - clocks and the offset consensus algorithm
//!
//! This crate implements the arithmetic of a synchronization cycle:
//! - Clock sources (system, manual) and the coordinator's virtual clock
//! - RTT-compensated offset estimation from a request/response exchange
//! - Sample statistics, outlier rejection and the consensus offset

pub mod clock;
pub mod estimate;
pub mod stats;
pub mod consensus;

pub use clock::*;
pub use estimate::*;
pub use stats::*;
pub use consensus::*;
