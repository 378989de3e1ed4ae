//! Prometheus metrics HTTP endpoint
//!
//! Exposes tracker metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a single-sample metric with the device label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    device: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{device=\"{device}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{device=\"{device}\"}} {count}");
}

fn format_prometheus_metrics(summary: &MetricsSummary, device: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "tracker_fixes_total",
        "Foreground location fixes received",
        MetricType::Counter,
        device,
        summary.fixes_received,
    );
    write_metric(
        &mut output,
        "tracker_fixes_throttled_total",
        "Fixes dropped for arriving under the minimum interval",
        MetricType::Counter,
        device,
        summary.fixes_throttled,
    );
    write_metric(
        &mut output,
        "tracker_zone_events_total",
        "Zone transitions received",
        MetricType::Counter,
        device,
        summary.zone_events,
    );

    write_metric(
        &mut output,
        "tracker_dispatch_sent_total",
        "Messages handed to the messaging channel",
        MetricType::Counter,
        device,
        summary.dispatch_sent,
    );
    write_metric(
        &mut output,
        "tracker_dispatch_failed_total",
        "Messages the channel rejected",
        MetricType::Counter,
        device,
        summary.dispatch_failed,
    );
    write_metric(
        &mut output,
        "tracker_dispatch_skipped_total",
        "Messages skipped for lack of a contact number",
        MetricType::Counter,
        device,
        summary.dispatch_skipped,
    );
    write_histogram(
        &mut output,
        "tracker_dispatch_latency_ms",
        "Channel send latency in milliseconds",
        device,
        &summary.dispatch_latency_buckets,
        summary.dispatch_latency_total_ms,
    );
    write_metric(
        &mut output,
        "tracker_dispatch_latency_max_ms",
        "Maximum send latency since the last scrape",
        MetricType::Gauge,
        device,
        summary.dispatch_max_latency_ms,
    );

    write_metric(
        &mut output,
        "tracker_periodic_runs_total",
        "Periodic job invocations",
        MetricType::Counter,
        device,
        summary.periodic_runs,
    );
    write_metric(
        &mut output,
        "tracker_periodic_retries_total",
        "Periodic job invocations that asked for a retry",
        MetricType::Counter,
        device,
        summary.periodic_retries,
    );
    write_metric(
        &mut output,
        "tracker_periodic_failures_total",
        "Periodic job cycles that failed terminally",
        MetricType::Counter,
        device,
        summary.periodic_failures,
    );

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    device: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.snapshot(), &device);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Serve metrics until shutdown is signalled
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    device: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let device = Arc::new(device);

    info!(port = %port, device = %device, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let device = device.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), device.clone())
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "prometheus_accept_error"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
