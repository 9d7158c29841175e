use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vellum_projection_hit_total",
            Unit::Count,
            "Projection lookups served from the cache."
        );
        describe_counter!(
            "vellum_projection_miss_total",
            Unit::Count,
            "Projection lookups rebuilt from the store."
        );
        describe_counter!(
            "vellum_projection_purged_total",
            Unit::Count,
            "Projection entries dropped by invalidation."
        );
        describe_counter!(
            "vellum_fragment_hit_total",
            Unit::Count,
            "Rendered fragment cache hits."
        );
        describe_counter!(
            "vellum_fragment_miss_total",
            Unit::Count,
            "Rendered fragment cache misses."
        );
        describe_counter!(
            "vellum_fragment_evict_total",
            Unit::Count,
            "Rendered fragments evicted due to capacity."
        );
        describe_histogram!(
            "vellum_cache_apply_ms",
            Unit::Milliseconds,
            "Time to apply one channel payload in milliseconds."
        );
        describe_histogram!(
            "vellum_flush_ms",
            Unit::Milliseconds,
            "Local flush latency of one change batch in milliseconds."
        );
        describe_counter!(
            "vellum_cluster_delivered_total",
            Unit::Count,
            "Envelopes accepted by a peer."
        );
        describe_counter!(
            "vellum_cluster_delivery_failed_total",
            Unit::Count,
            "Envelopes that could not be delivered to a peer."
        );
    });
}
