//! OTLP export, Prometheus metrics and per-request instrumentation.
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{Unit, counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::{Span, Status, Tracer};
use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Seconds between two samples of the process gauges.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Requests are short, deletions chain several backend round trips.
const REQUEST_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
const DELETION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn service() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Spans and log records shipped to an OTLP collector over gRPC.
pub struct Otlp {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
}

impl Otlp {
    pub fn connect(endpoint: &str) -> Result<Self, BoxError> {
        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let logs = LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(service())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(service())
                .build(),
        })
    }

    /// `tracing` layer forwarding every event as a log record.
    pub fn log_layer(&self) -> OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger> {
        OpenTelemetryTracingBridge::new(&self.logger)
    }

    /// Make [`track`] spans flow to the collector.
    pub fn install(&self) {
        global::set_tracer_provider(self.tracer.clone());
    }

    /// Flush pending batches.
    pub fn shutdown(self) {
        if let Err(err) = self.tracer.shutdown() {
            tracing::warn!(error = ?err, "span exporter did not flush");
        }
        if let Err(err) = self.logger.shutdown() {
            tracing::warn!(error = ?err, "log exporter did not flush");
        }
    }
}

/// Install the global Prometheus recorder and start sampling the process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BoxError> {
    metrics::describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Requests served, by method, route and status."
    );
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Time spent answering a request."
    );
    metrics::describe_counter!(
        "account_deletions_total",
        Unit::Count,
        "Account deletion requests by outcome."
    );
    metrics::describe_histogram!(
        "account_deletion_duration_seconds",
        Unit::Seconds,
        "Time from authentication to identity removal."
    );
    metrics::describe_counter!(
        "storage_objects_removed_total",
        Unit::Count,
        "Objects removed from storage buckets."
    );
    metrics::describe_gauge!(
        "process_cpu_usage",
        Unit::Percent,
        "CPU usage of the process."
    );
    metrics::describe_gauge!(
        "process_memory_used_bytes",
        Unit::Bytes,
        "Resident memory of the process."
    );

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_owned()),
            REQUEST_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("account_deletion_duration_seconds".to_owned()),
            DELETION_BUCKETS,
        )?
        .install_recorder()?;

    tokio::spawn(sample_process());

    Ok(handle)
}

async fn sample_process() {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let refresh = ProcessRefreshKind::nothing().with_memory().with_cpu();

    loop {
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        if let Some(process) = system.process(pid) {
            gauge!("process_memory_used_bytes").set(process.memory() as f64);
            gauge!("process_cpu_usage").set(f64::from(process.cpu_usage()));
        }

        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }
}

/// Count, time and trace every routed request.
pub async fn track(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |path| path.as_str().to_owned());
    let method = req.method().to_string();

    let mut span = global::tracer(env!("CARGO_PKG_NAME")).start(format!("{method} {route}"));
    let started = Instant::now();

    let response = next.run(req).await;

    let elapsed = started.elapsed().as_secs_f64();
    let status = response.status();

    span.set_attributes([
        KeyValue::new("http.request.method", method.clone()),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.response.status_code", i64::from(status.as_u16())),
    ]);
    if status.is_server_error() {
        span.set_status(Status::error(status.to_string()));
    }
    span.end();

    let labels = [
        ("method", method),
        ("route", route),
        ("status", status.as_u16().to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_requests_duration_seconds", &labels).record(elapsed);

    response
}
