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
            "diarender_export_fresh_total",
            Unit::Count,
            "Exports served from a cached PNG that was still fresh."
        );
        describe_counter!(
            "diarender_export_converted_total",
            Unit::Count,
            "Exports regenerated by running the converter."
        );
        describe_counter!(
            "diarender_export_failed_total",
            Unit::Count,
            "Converter runs that did not produce a usable PNG."
        );
        describe_counter!(
            "diarender_flight_joined_total",
            Unit::Count,
            "Requests that attached to an export already being regenerated."
        );
        describe_histogram!(
            "diarender_convert_ms",
            Unit::Milliseconds,
            "Converter latency in milliseconds."
        );
    });
}
