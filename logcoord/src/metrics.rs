use std::{sync::OnceLock, time::Duration};

use clippy_utilities::NumericCast;
use opentelemetry::{
    global::meter_with_version,
    metrics::{Histogram, Meter},
    KeyValue,
};

use logcoord_external_api::LogStreamId;

/// Global metrics for the log handler
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Meter for metrics
static METRICS_METER: OnceLock<Meter> = OnceLock::new();

/// Get the log handler metrics
fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics::new(meter()))
}

/// Get the log handler metrics meter
fn meter() -> &'static Meter {
    METRICS_METER.get_or_init(|| {
        meter_with_version(
            env!("CARGO_PKG_NAME"),
            Some(env!("CARGO_PKG_VERSION")),
            None::<&'static str>,
            Some(vec![KeyValue::new("component", "log_handler")]),
        )
    })
}

/// All metrics exported from the log handler
#[derive(Debug)]
struct Metrics {
    /// Wall-clock cost distribution of one append call, retries included.
    append_cost_microseconds: Histogram<u64>,
}

impl Metrics {
    /// Create a new `Metrics` from meter
    fn new(meter: &Meter) -> Self {
        Self {
            append_cost_microseconds: meter
                .u64_histogram("append_cost_microseconds")
                .with_description(
                    "The latency distributions of appends, from entry to final return.",
                )
                .init(),
        }
    }
}

/// Sample the cost of one append call for `stream_id`
pub(crate) fn record_append_cost(stream_id: LogStreamId, cost: Duration) {
    get().append_cost_microseconds.record(
        cost.as_micros().numeric_cast(),
        &[KeyValue::new("log_stream", stream_id.to_string())],
    );
}
