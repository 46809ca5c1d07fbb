//! Shared library for FincaOps services
//!
//! Provides common error types, the event bus, configuration resolution,
//! and SSE utilities used across the FincaOps microservices.

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
