//! Outbound half of the relay: picking a worker channel, refusing overlapping
//! requests, and publishing work onto the backbone.

pub mod allocator;
pub mod dispatcher;
pub mod guard;

pub use allocator::ChannelAllocator;
pub use dispatcher::Dispatcher;
pub use guard::DuplicateGuard;
