//! Berkeley Test Harness - In-process clusters and drift simulation
//!
//! This crate provides:
//! - Clock drift models and seeded offset generation
//! - A loopback cluster with honest and misbehaving clients
//! - End-to-end cycle scenarios

pub mod cluster;
pub mod drift;
pub mod scenarios;

pub use cluster::*;
pub use drift::*;
pub use scenarios::*;
