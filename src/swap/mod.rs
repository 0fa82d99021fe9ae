//! Per-swap lifecycle state machine and service.

pub mod service;

pub use service::{SwapService, SwapServiceConfig, WaitResult};
