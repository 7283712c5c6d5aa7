//! Framed JSON-RPC layer: wire framing, protocol types and the correlation
//! engine.

pub mod engine;
pub mod framing;
pub mod protocol;
