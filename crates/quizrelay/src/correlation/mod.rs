//! Inbound half of the relay: matching worker responses to the request that
//! caused them.

pub mod correlator;
pub mod listener;

pub use correlator::{CorrelationState, ResponseCorrelator};
pub use listener::listen;
