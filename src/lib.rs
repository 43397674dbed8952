use std::sync::Arc;

use axum::extract::FromRef;

pub mod auth;
pub mod background;
pub mod config;
pub mod data;
pub mod error;
pub mod mailer;
pub mod middleware;
pub mod result;
pub mod routes;
pub mod utils;
pub mod validator;

use auth::{AuthenticationResolver, AuthorizationChain};
use background::Background;
use config::Config;
use data::Models;
use mailer::Mailer;
use middleware::{Metrics, RateLimiter};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<Config>,
    pub models: Models,
    pub mailer: Arc<dyn Mailer>,
    pub background: Background,
    pub limiter: RateLimiter,
    pub metrics: Metrics,
    pub resolver: AuthenticationResolver,
    pub chain: AuthorizationChain,
}

impl AppState {
    /// 限流器的清理任务不在这里启动，由调用方决定
    pub fn new(config: Config, models: Models, mailer: Arc<dyn Mailer>) -> Self {
        let resolver = AuthenticationResolver::new(models.tokens.clone(), models.users.clone());
        let chain = AuthorizationChain::new(models.permissions.clone());

        Self {
            limiter: RateLimiter::new(&config.limiter),
            metrics: Metrics::default(),
            background: Background::new(config.background_workers),
            config: Arc::new(config),
            models,
            mailer,
            resolver,
            chain,
        }
    }
}
