//! HTTP API handlers for fincaops-bridge

pub mod directory;
pub mod health;
pub mod promote;
pub mod sse;
pub mod tickets;
