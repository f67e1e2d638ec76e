#![doc = include_str!("../README.md")]

pub mod backbone;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod estimator;
mod relay;
pub mod session;
pub mod store;
pub mod telemetry;

pub use crate::backbone::{Backbone, MemoryBackbone, Record, Subscription};
pub use crate::config::*;
pub use crate::correlation::{CorrelationState, ResponseCorrelator};
pub use crate::dispatch::{ChannelAllocator, Dispatcher, DuplicateGuard};
pub use crate::estimator::{QueueEstimate, QueuePositionEstimator};
pub use crate::relay::Relay;
pub use crate::session::SessionManager;
pub use crate::store::{KeyValueStore, MemoryStore};
pub use quizrelay_core::*;
