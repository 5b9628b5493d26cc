mod allocations;
mod auth;
mod config;
mod cv;
mod dashboard;
mod db;
mod errors;
mod models;
mod nlp_client;
mod notifications;
mod projects;
mod recommendations;
mod resource_requests;
mod routes;
mod skills;
mod state;
mod uploads;
mod users;
mod work_requests;
mod workflow;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::{Config, RecommenderBackend};
use crate::db::create_pool;
use crate::nlp_client::NlpClient;
use crate::recommendations::{NlpRecommender, Recommender, SkillMatchRecommender};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RSCM API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize NLP client
    let nlp = NlpClient::new(
        &config.nlp_service_url,
        Duration::from_secs(config.nlp_timeout_secs),
    )
    .context("building NLP service client")?;
    info!("NLP client initialized ({})", config.nlp_service_url);

    // Recommender backend (SkillMatchRecommender by default; swap via RECOMMENDER_BACKEND)
    let recommender: Arc<dyn Recommender> = match config.recommender_backend {
        RecommenderBackend::SkillMatch => Arc::new(SkillMatchRecommender),
        RecommenderBackend::Nlp => Arc::new(NlpRecommender::new(nlp.clone())),
    };
    info!("Recommender backend: {}", recommender.backend());

    // Build app state
    let state = AppState {
        db,
        redis,
        s3,
        nlp,
        config: config.clone(),
        recommender,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "rscm-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
