//! Dispatcher and session statistics

pub mod metrics;

pub use metrics::{DispatchSnapshot, DispatchStats, SessionStats};
