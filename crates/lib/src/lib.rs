//! Wagate core library — protocol entities, gateway state machine, transport
//! seam, and the synchronous facade used by the CLI and transport adapters.

pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod layer;
pub mod result;
pub mod transport;
