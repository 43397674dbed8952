use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::time::Instant;

use crate::result::success_to_api_response;

#[derive(Default)]
struct Counters {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
}

/// 进程级请求计数，在 `/debug/vars` 暴露
#[derive(Clone, Default)]
pub struct Metrics {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    #[serde(rename = "total_processing_time_μs")]
    pub total_processing_time_us: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.counters.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.counters.responses_sent.load(Ordering::Relaxed),
            total_processing_time_us: self.counters.processing_time_us.load(Ordering::Relaxed),
        }
    }

    fn request_received(&self) {
        self.counters.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    fn response_sent(&self, started: Instant) {
        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.counters.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .processing_time_us
            .fetch_add(elapsed, Ordering::Relaxed);
    }
}

/// 最外层中间件，panic 恢复之后的响应也会被计入
pub async fn track_metrics(
    State(metrics): State<Metrics>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    metrics.request_received();
    let response = next.run(req).await;
    metrics.response_sent(started);
    response
}

pub async fn debug_vars(State(metrics): State<Metrics>) -> impl IntoResponse {
    success_to_api_response(metrics.snapshot())
}
