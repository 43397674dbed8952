mod auth;
mod error_handler;
mod metrics;
mod rate_limit;

pub use auth::{Guard, authenticate, require};
pub use error_handler::{handle_panic, log_errors};
pub use metrics::{Metrics, MetricsSnapshot, debug_vars, track_metrics};
pub use rate_limit::{IDLE_WINDOW, RateLimiter, SWEEP_INTERVAL, rate_limit};
