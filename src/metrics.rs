//! Metrics for the mutant detector
//!
//! Instruments are registered on the global meter, so they are no-ops until
//! telemetry installs an OTLP meter provider.

use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::Error;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("mutant-detector"));

/// Histogram of ReplicaSet reconciliation duration
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("mutant_detector_reconcile_duration_seconds")
        .with_description("Duration of ReplicaSet reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconciliation errors
///
/// Labels:
/// - `error_type`: fetch, instance_list, selector_conversion, update_conflict,
///   update, serialization
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("mutant_detector_reconcile_errors_total")
        .with_description("Total number of ReplicaSet reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of verdicts computed
///
/// Labels:
/// - `mutant`: true, false
pub static VERDICTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("mutant_detector_verdicts_total")
        .with_description("Total number of ReplicaSet verdicts by outcome")
        .with_unit("{verdicts}")
        .build()
});

/// Record how long a reconciliation pass took
pub fn record_reconcile(elapsed: Duration, success: bool) {
    let result = if success { "success" } else { "error" };
    RECONCILE_DURATION.record(elapsed.as_secs_f64(), &[KeyValue::new("result", result)]);
}

/// Record a reconciliation error by kind
pub fn record_error(error: &Error) {
    RECONCILE_ERRORS.add(1, &[KeyValue::new("error_type", error.kind())]);
}

/// Record a computed verdict
///
/// ReplicaSets come and go with every rollout, so object names are kept out
/// of the attributes.
pub fn record_verdict(mutant: bool) {
    VERDICTS.add(1, &verdict_attributes(mutant));
}

fn verdict_attributes(mutant: bool) -> [KeyValue; 1] {
    [KeyValue::new("mutant", mutant.to_string())]
}
