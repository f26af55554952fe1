use std::env;

use opentelemetry::global;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const SERVICE_NAME: &str = "imgq";

/// Install the global subscriber. Spans are exported to a Jaeger collector
/// only when `jaeger_endpoint` is given; stdout logging is always on.
pub fn init(jaeger_endpoint: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let Some(endpoint) = jaeger_endpoint else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::Layer::default())
            .try_init()?;
        return Ok(());
    };

    // The collector is reached directly, never through a proxy.
    env::remove_var("http_proxy");
    env::remove_var("https_proxy");
    env::remove_var("HTTP_PROXY");
    env::remove_var("HTTPS_PROXY");

    global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());

    let tracer = opentelemetry_jaeger::new_collector_pipeline()
        .with_endpoint(endpoint)
        .with_service_name(SERVICE_NAME)
        .with_isahc()
        .with_timeout(std::time::Duration::from_secs(2))
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(telemetry)
        .with(filter_layer)
        .with(fmt::Layer::default())
        .try_init()?;

    Ok(())
}

pub fn shutdown() {
    global::shutdown_tracer_provider();
}
