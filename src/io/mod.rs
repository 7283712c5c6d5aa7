//! I/O layer - server subprocess lifecycle
//!
//! Owns process spawning, stderr draining and termination. Protocol framing
//! lives in the rpc layer; this one only hands out raw byte streams.

pub mod connection;

pub use connection::{Connection, LaunchError, StopMode};
