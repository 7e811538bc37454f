use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use clap::{Parser, Subcommand};
use http::HeaderValue;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod testing;

use config::Config;
use error::AppError;
use services::init;
use services::webhooks::ReplayArgs;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
}

#[derive(Parser)]
#[command(name = "emdr-academy")]
#[command(about = "EMDR Academy learning platform backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the HTTP API server (default)")]
    Serve,

    #[command(about = "Sign a synthetic video webhook and deliver it to a running server")]
    ReplayWebhook(ReplayArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::ReplayWebhook(args) => services::webhooks::replay(args).await,
    }
}

/// `LOG_FORMAT=json` switches to JSON lines; otherwise human-readable output.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emdr_academy=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Governor rejections rendered through `AppError`, keeping the limiter's headers.
fn rate_limit_error(error: GovernorError) -> http::Response<Body> {
    let (error, headers) = match error {
        GovernorError::TooManyRequests { wait_time, headers } => (
            AppError::RateLimited {
                retry_after_seconds: wait_time,
            },
            headers,
        ),
        GovernorError::UnableToExtractKey => (
            AppError::BadRequest("Unable to determine client IP for rate limiting".to_string()),
            None,
        ),
        GovernorError::Other { code, msg, headers } => (
            AppError::Internal(anyhow::anyhow!(
                "rate limiter failed with {}: {}",
                code,
                msg.unwrap_or_default()
            )),
            headers,
        ),
    };

    let mut resp = error.into_response();
    if let Some(hmap) = headers {
        for (name, value) in hmap.iter() {
            if !resp.headers().contains_key(name) {
                resp.headers_mut().append(name.clone(), value.clone());
            }
        }
    }
    resp
}

/// Periodically drop stale limiter entries until `stop` is raised.
fn spawn_limiter_cleanup<F>(name: &'static str, stop: Arc<AtomicBool>, cleanup: F) -> std::thread::JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    std::thread::spawn(move || {
        let interval = Duration::from_secs(60);
        let tick = Duration::from_secs(1);
        loop {
            for _ in 0..interval.as_secs() {
                if stop.load(Ordering::SeqCst) {
                    tracing::info!("{} rate limiter cleanup thread exiting", name);
                    return;
                }
                std::thread::sleep(tick);
            }
            cleanup();
        }
    })
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing::info!("Starting EMDR Academy backend");

    let pool = init::init_db(&config).await?;
    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
    });
    init::ensure_bootstrap_admin(&app_state).await?;

    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Auth endpoints: login and password reset are brute-force targets.
    let mut auth_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    auth_builder
        .per_second(config.rate_limit.auth_per_second.into())
        .burst_size(config.rate_limit.auth_burst)
        .error_handler(rate_limit_error);
    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );
    let auth_cleaner = {
        let limiter = auth_gov_conf.limiter().clone();
        spawn_limiter_cleanup("Auth", thread_shutdown.clone(), move || {
            tracing::debug!("auth rate limiter size: {}", limiter.len());
            limiter.retain_recent();
        })
    };

    let mut webhooks_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    webhooks_builder
        .per_second(config.rate_limit.webhook_per_second.into())
        .burst_size(config.rate_limit.webhook_burst)
        .error_handler(rate_limit_error);
    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );
    let webhooks_cleaner = {
        let limiter = webhooks_gov_conf.limiter().clone();
        spawn_limiter_cleanup("Webhooks", thread_shutdown.clone(), move || {
            tracing::debug!("webhooks rate limiter size: {}", limiter.len());
            limiter.retain_recent();
        })
    };

    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|_| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", config.server.frontend_url))?;

    let app = routes::app_router(
        routes::auth::router().layer(GovernorLayer {
            config: auth_gov_conf,
        }),
        routes::webhooks::router().layer(GovernorLayer {
            config: webhooks_gov_conf,
        }),
    )
    .with_state(app_state)
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(frontend_origin)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::PUT,
                http::Method::DELETE,
                http::Method::OPTIONS,
            ])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::AUTHORIZATION,
                http::header::ACCEPT,
            ])
            .allow_credentials(true),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped accepting connections, stopping limiter cleanup threads");
    thread_shutdown.store(true, Ordering::SeqCst);
    if auth_cleaner.join().is_err() {
        tracing::warn!("Auth rate limiter cleanup thread panicked");
    }
    if webhooks_cleaner.join().is_err() {
        tracing::warn!("Webhooks rate limiter cleanup thread panicked");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to bind SIGTERM: {}", e);
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
