use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State, connect_info::MockConnectInfo},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LimiterConfig;
use crate::error::AppError;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const IDLE_WINDOW: Duration = Duration::from_secs(3 * 60);

/// 单个客户端的令牌桶
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }
}

struct Buckets {
    rate: f64,
    burst: f64,
    clients: DashMap<String, Bucket>,
}

impl Buckets {
    fn evict_idle(&self, idle: Duration) {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= idle);
        let evicted = before.saturating_sub(self.clients.len());
        if evicted > 0 {
            tracing::debug!("Evicted {} idle rate limit buckets", evicted);
        }
    }
}

/// 按客户端地址限流。关闭时所有请求直接放行，也不创建任何桶或后台任务
#[derive(Clone)]
pub struct RateLimiter {
    inner: Option<Arc<Buckets>>,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        let inner = config.enabled.then(|| {
            Arc::new(Buckets {
                rate: config.rps,
                burst: f64::from(config.burst),
                clients: DashMap::new(),
            })
        });
        Self {
            inner,
            trust_proxy: config.trust_proxy,
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// 桶的查找、补充和扣减在同一个分片锁内完成
    pub fn admit(&self, identity: &str) -> bool {
        let Some(buckets) = &self.inner else {
            return true;
        };

        let now = Instant::now();
        let mut bucket = buckets
            .clients
            .entry(identity.to_owned())
            .or_insert_with(|| Bucket::full(buckets.burst, now));

        bucket.refill(now, buckets.rate, buckets.burst);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn evict_idle(&self, idle: Duration) {
        if let Some(buckets) = &self.inner {
            buckets.evict_idle(idle);
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.as_ref().map_or(0, |buckets| buckets.clients.len())
    }

    pub fn is_tracked(&self, identity: &str) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|buckets| buckets.clients.contains_key(identity))
    }

    /// 定期清理空闲的桶；限流器被释放后任务自行结束
    pub fn spawn_sweeper(&self, every: Duration, idle: Duration) -> Option<JoinHandle<()>> {
        let weak: Weak<Buckets> = Arc::downgrade(self.inner.as_ref()?);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(buckets) = weak.upgrade() else {
                    break;
                };
                buckets.evict_idle(idle);
            }
        }))
    }

    fn client_ip(&self, req: &Request<Body>) -> Option<String> {
        let forwarded = if self.trust_proxy {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .or_else(|| {
                    req.headers()
                        .get("x-forwarded-for")
                        .and_then(|h| h.to_str().ok())
                        .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
                })
                .map(|ip| ip.trim().to_string())
        } else {
            None
        };

        forwarded.or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
                .or_else(|| {
                    req.extensions()
                        .get::<MockConnectInfo<SocketAddr>>()
                        .map(|mock| mock.0.ip().to_string())
                })
        })
    }

    pub async fn check_rate_limit(&self, req: Request<Body>, next: Next) -> Response {
        if !self.enabled() {
            return next.run(req).await;
        }

        let Some(ip) = self.client_ip(&req) else {
            return AppError::internal("unable to determine client address").into_response();
        };

        if !self.admit(&ip) {
            tracing::debug!("Rate limit exceeded for {}", ip);
            return AppError::RateLimited.into_response();
        }

        next.run(req).await
    }
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&LimiterConfig {
            rps,
            burst,
            enabled: true,
            trust_proxy: false,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let limiter = limiter(2.0, 4);
        for _ in 0..4 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert!(!limiter.admit("10.0.0.1"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.admit("10.0.0.1"));
        assert!(!limiter.admit("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let limiter = limiter(2.0, 4);
        assert!(limiter.admit("10.0.0.1"));
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..4 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert!(!limiter.admit("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn clients_have_separate_buckets() {
        let limiter = limiter(1.0, 1);
        assert!(limiter.admit("10.0.0.1"));
        assert!(!limiter.admit("10.0.0.1"));
        assert!(limiter.admit("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[tokio::test]
    async fn disabled_limiter_admits_everything_without_state() {
        let limiter = RateLimiter::new(&LimiterConfig {
            enabled: false,
            ..LimiterConfig::default()
        });
        for _ in 0..100 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(limiter.spawn_sweeper(SWEEP_INTERVAL, IDLE_WINDOW).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_keeps_recent_clients() {
        let limiter = limiter(2.0, 4);
        limiter.admit("idle");
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.admit("recent");
        tokio::time::advance(Duration::from_secs(61)).await;

        limiter.evict_idle(IDLE_WINDOW);
        assert!(!limiter.is_tracked("idle"));
        assert!(limiter.is_tracked("recent"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_bucket_after_idle_window_and_interval() {
        let limiter = limiter(2.0, 4);
        let sweeper = limiter.spawn_sweeper(SWEEP_INTERVAL, IDLE_WINDOW).unwrap();
        limiter.admit("10.0.0.9");
        assert!(limiter.is_tracked("10.0.0.9"));

        tokio::time::sleep(IDLE_WINDOW + SWEEP_INTERVAL + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(!limiter.is_tracked("10.0.0.9"));

        drop(limiter);
        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_burst() {
        let limiter = limiter(0.0001, 50);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.admit("shared")).count()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            admitted += handle.await.unwrap();
        }
        assert_eq!(admitted, 50);
    }
}
