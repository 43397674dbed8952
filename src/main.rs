use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use greenlight::{
    AppState,
    config::Config,
    data::Models,
    mailer::LogMailer,
    middleware::{IDLE_WINDOW, SWEEP_INTERVAL},
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env();

    // 设置存储
    let models = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .idle_timeout(config.db_max_idle())
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'greenlight';").await?;
                        Ok(())
                    })
                })
                .connect(database_url)
                .await
                .expect("Failed to connect to Postgres");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database connection pool established");

            Models::postgres(pool, config.query_timeout())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Models::in_memory(config.query_timeout())
        }
    };

    let mailer = Arc::new(LogMailer::new(config.smtp_sender.clone()));
    let state = AppState::new(config, models, mailer);

    // 设置限流器的空闲清理
    if state.limiter.spawn_sweeper(SWEEP_INTERVAL, IDLE_WINDOW).is_none() {
        tracing::info!("Rate limiter disabled");
    }

    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    let background = state.background.clone();
    let app = routes::app(state.clone());

    tracing::info!(env = %state.config.environment, "Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    tracing::info!("Waiting for background jobs to finish");
    background.shutdown(BACKGROUND_DRAIN_TIMEOUT).await;
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
