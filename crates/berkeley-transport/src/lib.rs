//! Berkeley Transport Layer - TCP listener and connections
//!
//! This crate provides:
//! - A listener whose accept can be polled with a short timeout
//! - Connections where every read and write carries a deadline
//! - Graceful half-close before a connection is dropped

pub mod tcp;

pub use tcp::*;
