//! Metric hooks for the correlation layer.
//!
//! With the `metrics` feature enabled, the host registers an OpenTelemetry
//! [`Meter`] once through [`init_metric_handles`] and every hook below records
//! into the matching instrument, tagged with the work family. Without the
//! feature the hooks compile to no-ops, so call sites never need `cfg` guards.
//!
//! Instruments:
//!
//! - `dispatches` - requests published to a worker channel
//! - `duplicate_rejections` - requests refused by the duplicate-request guard
//! - `responses_received` - worker responses appended to a client bucket
//! - `responses_discarded` - stale responses dropped in favor of a newer one
//! - `deliveries` - responses handed back to a caller
//! - `sessions_destroyed` - sessions torn down explicitly or by the sweeper
//! - `dispatch_duration` - publish round trip, in milliseconds

use quizrelay_core::Family;

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static DISPATCHES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DUPLICATE_REJECTIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RESPONSES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RESPONSES_DISCARDED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DELIVERIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SESSIONS_DESTROYED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DISPATCH_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

/// Registers the relay's instruments on `meter`. Later calls are ignored.
#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: &Meter) {
    let _ = DISPATCHES.set(
        meter
            .u64_counter("dispatches")
            .with_description("Requests published to worker channels")
            .build(),
    );

    let _ = DUPLICATE_REJECTIONS.set(
        meter
            .u64_counter("duplicate_rejections")
            .with_description("Requests refused while a previous one was in flight")
            .build(),
    );

    let _ = RESPONSES_RECEIVED.set(
        meter
            .u64_counter("responses_received")
            .with_description("Worker responses appended to client buckets")
            .build(),
    );

    let _ = RESPONSES_DISCARDED.set(
        meter
            .u64_counter("responses_discarded")
            .with_description("Stale responses dropped in favor of a newer one")
            .build(),
    );

    let _ = DELIVERIES.set(
        meter
            .u64_counter("deliveries")
            .with_description("Responses handed back to callers")
            .build(),
    );

    let _ = SESSIONS_DESTROYED.set(
        meter
            .u64_counter("sessions_destroyed")
            .with_description("Sessions torn down explicitly or after idling")
            .build(),
    );

    let _ = DISPATCH_DURATION_MS.set(
        meter
            .f64_histogram("dispatch_duration")
            .with_unit("ms")
            .with_description("Publish round trip until backbone acknowledgement")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn family_attr(family: Family) -> [KeyValue; 1] {
    [KeyValue::new("family", family.as_str())]
}

#[cfg(feature = "metrics")]
pub fn increment_dispatches(family: Family) {
    if let Some(counter) = DISPATCHES.get() {
        counter.add(1, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_dispatches(_family: Family) {}

#[cfg(feature = "metrics")]
pub fn increment_duplicate_rejections(family: Family) {
    if let Some(counter) = DUPLICATE_REJECTIONS.get() {
        counter.add(1, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_duplicate_rejections(_family: Family) {}

#[cfg(feature = "metrics")]
pub fn increment_responses_received(family: Family) {
    if let Some(counter) = RESPONSES_RECEIVED.get() {
        counter.add(1, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_responses_received(_family: Family) {}

#[cfg(feature = "metrics")]
pub fn increment_responses_discarded(family: Family, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(counter) = RESPONSES_DISCARDED.get() {
        counter.add(count, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_responses_discarded(_family: Family, _count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_deliveries(family: Family) {
    if let Some(counter) = DELIVERIES.get() {
        counter.add(1, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_deliveries(_family: Family) {}

#[cfg(feature = "metrics")]
pub fn increment_sessions_destroyed() {
    if let Some(counter) = SESSIONS_DESTROYED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sessions_destroyed() {}

#[cfg(feature = "metrics")]
pub fn record_dispatch_duration(family: Family, duration_ms: f64) {
    if let Some(histogram) = DISPATCH_DURATION_MS.get() {
        histogram.record(duration_ms, &family_attr(family));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_dispatch_duration(_family: Family, _duration_ms: f64) {}
