use anyhow::{Context, Result};
use bacnet_forwarder::bacnet::BacnetClient;
use bacnet_forwarder::cli;
use bacnet_forwarder::config::{Config, SinkKind};
use bacnet_forwarder::scheduler::CycleScheduler;
use bacnet_forwarder::sink::{RecordSink, StdoutSink, TimestreamSink};
use clap::Parser;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bacnet_forwarder=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "bacnet-forwarder"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn build_sink(config: &Config) -> Result<Arc<dyn RecordSink>> {
    match config.sink {
        SinkKind::Timestream => {
            let (database, table) = config.timestream_target()?;
            let sink = TimestreamSink::connect(config.aws_region.as_deref(), database, table)
                .await
                .context("failed to set up Timestream sink")?;
            Ok(Arc::new(sink))
        }
        SinkKind::Stdout => Ok(Arc::new(StdoutSink::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let mut config = Config::from_env()?;
    args.apply(&mut config);

    let points = config.point_list()?;
    if args.print_points {
        println!("{}", points.to_json()?);
        return Ok(());
    }

    init_tracing(&config)?;
    tracing::info!(
        points = points.len(),
        interval_secs = args.interval,
        sink = ?config.sink,
        "bacnet-forwarder starting"
    );

    let startup_delay = config.startup_delay();
    if !startup_delay.is_zero() {
        tracing::info!(seconds = startup_delay.as_secs(), "waiting before first cycle");
        tokio::select! {
            _ = tokio::time::sleep(startup_delay) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received during startup delay");
                return Ok(());
            }
        }
    }

    let client = BacnetClient::bind(
        config.bacnet_bind,
        config.apdu_timeout(),
        config.apdu_retries,
    )
    .await
    .with_context(|| format!("failed to bind BACnet socket on {}", config.bacnet_bind))?;
    tracing::info!(local = ?client.local_addr(), "BACnet client bound");
    let sink = build_sink(&config).await?;

    let scheduler = CycleScheduler::new(points, Arc::new(client), sink, config.scheduler_config());
    let stats = scheduler.stats();
    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(args.interval);
        tokio::spawn(async move { scheduler.run(interval, cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    // The running cycle abandons its reads on cancel, so only the final sink writes remain.
    match tokio::time::timeout(SHUTDOWN_GRACE, runner).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "scheduler task failed"),
        Err(_) => tracing::warn!("scheduler did not stop in time; exiting anyway"),
    }
    tracing::info!(
        cycles = stats.cycles_completed.load(Ordering::Relaxed),
        skipped = stats.ticks_skipped.load(Ordering::Relaxed),
        submitted = stats.records_submitted.load(Ordering::Relaxed),
        rejected = stats.records_rejected.load(Ordering::Relaxed),
        dropped = stats.records_dropped.load(Ordering::Relaxed),
        faults = stats.faults.load(Ordering::Relaxed),
        last_cycle_micros = stats.last_cycle_micros.load(Ordering::Relaxed),
        last_cycle_unix_ms = stats.last_cycle_unix_ms.load(Ordering::Relaxed),
        "bacnet-forwarder stopped"
    );

    if config.otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn otlp_endpoint_gets_traces_path() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
