//! Berkeley Core - Fundamental types and primitives
//!
//! This crate defines the types shared by the coordinator and its clients:
//! - Identifiers (ProcessId, CycleIndex)
//! - Time primitives (Timestamp)
//! - Wire payloads of the request/response protocol
//! - The error taxonomy of a synchronization cycle

pub mod id;
pub mod time;
pub mod protocol;
pub mod error;

pub use id::*;
pub use time::*;
pub use protocol::*;
pub use error::*;
