use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::config::Config;
use crate::nlp_client::NlpClient;
use crate::recommendations::Recommender;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Recommendation result cache.
    pub redis: RedisClient,
    /// CV uploads and skill proof documents.
    pub s3: S3Client,
    pub nlp: NlpClient,
    pub config: Config,
    /// Pluggable recommender. Default: SkillMatchRecommender. Swap via RECOMMENDER_BACKEND.
    pub recommender: Arc<dyn Recommender>,
}
