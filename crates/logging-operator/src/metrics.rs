use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    TextEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::conditions::ElementState;

// --- Global metrics registered with the default prometheus registry ---

static RECONCILIATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "logging_operator_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["controller", "result"],
    )
    .expect("metric can be created");
    prometheus::register(Box::new(counter.clone())).expect("metric can be registered");
    counter
});

static RECONCILE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let hist = HistogramVec::new(
        HistogramOpts::new(
            "logging_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        ),
        &["controller"],
    )
    .expect("metric can be created");
    prometheus::register(Box::new(hist.clone())).expect("metric can be registered");
    hist
});

static FORWARDER_ELEMENTS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "logging_operator_forwarder_elements",
            "Forwarder inputs, outputs and pipelines by validation state",
        ),
        &["kind", "state"],
    )
    .expect("metric can be created");
    prometheus::register(Box::new(gauge.clone())).expect("metric can be registered");
    gauge
});

static CERTIFICATES_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "logging_operator_certificates_issued_total",
        "Component certificates signed by the logging CA",
    )
    .expect("metric can be created");
    prometheus::register(Box::new(counter.clone())).expect("metric can be registered");
    counter
});

static READY: AtomicBool = AtomicBool::new(false);

/// Record a completed reconciliation.
pub fn record_reconciliation(controller: &str, result: &str) {
    RECONCILIATIONS
        .with_label_values(&[controller, result])
        .inc();
}

/// Observe reconciliation duration.
pub fn observe_reconcile_duration(controller: &str, duration_secs: f64) {
    RECONCILE_DURATION
        .with_label_values(&[controller])
        .observe(duration_secs);
}

/// Publish how many forwarder elements of `kind` ended up in each state.
pub fn set_forwarder_elements<'a>(kind: &str, states: impl IntoIterator<Item = &'a ElementState>) {
    let mut counts = [0i64; 3];
    for state in states {
        counts[state_index(*state)] += 1;
    }
    for state in [ElementState::Accepted, ElementState::Degraded, ElementState::Dropped] {
        FORWARDER_ELEMENTS
            .with_label_values(&[kind, state.as_str()])
            .set(counts[state_index(state)]);
    }
}

fn state_index(state: ElementState) -> usize {
    match state {
        ElementState::Accepted => 0,
        ElementState::Degraded => 1,
        ElementState::Dropped => 2,
    }
}

pub fn record_certificates_issued(count: usize) {
    CERTIFICATES_ISSUED.inc_by(count as u64);
}

/// Flip `/readyz` once the controllers are running.
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::SeqCst);
}

/// Encode all registered metrics as Prometheus text format.
fn encode_metrics() -> Result<Vec<u8>, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {e}"))?;
    Ok(buffer)
}

fn respond(path: &str) -> (&'static str, &'static str, Vec<u8>) {
    match path {
        "/metrics" => match encode_metrics() {
            Ok(data) => ("200 OK", "text/plain; version=0.0.4; charset=utf-8", data),
            Err(e) => ("500 Internal Server Error", "text/plain", e.into_bytes()),
        },
        "/healthz" => ("200 OK", "text/plain", b"ok".to_vec()),
        "/readyz" if READY.load(Ordering::SeqCst) => ("200 OK", "text/plain", b"ok".to_vec()),
        "/readyz" => (
            "503 Service Unavailable",
            "text/plain",
            b"not ready".to_vec(),
        ),
        _ => ("404 Not Found", "text/plain", b"not found".to_vec()),
    }
}

/// Start the metrics and health HTTP server.
///
/// Serves:
/// - `GET /metrics`: Prometheus metrics
/// - `GET /healthz`: liveness, always 200
/// - `GET /readyz`: 200 once [`set_ready`] has been called
pub async fn serve(addr: String) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = match stream.read(&mut buf).await {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    let request = String::from_utf8_lossy(&buf[..n]);

                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/");
                    let (status, content_type, body) = respond(path);

                    let header = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );

                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                });
            }
            Err(e) => {
                error!("Failed to accept metrics connection: {e}");
            }
        }
    }
}
