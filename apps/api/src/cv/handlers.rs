use anyhow::Context;
use axum::{
    extract::{Multipart, State},
    Json,
};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cv::{content_hash, merge_confirmations, normalize_text, ConfirmedSkill, CvFormat};
use crate::errors::AppError;
use crate::models::cv::CvCacheRow;
use crate::models::skill::UserSkillRow;
use crate::nlp_client::CvEntity;
use crate::skills::{all_skills, resolve_skill_names, SkillResolution};
use crate::state::AppState;
use crate::uploads::{read_file_field, UploadedFile};

#[derive(Debug, Serialize)]
pub struct CvAnalysis {
    pub cv_id: Uuid,
    pub content_hash: String,
    pub cached: bool,
    pub entities: Vec<CvEntity>,
    pub skills: SkillResolution,
    pub analysed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmSkillsRequest {
    pub skills: Vec<ConfirmedSkill>,
}

async fn extract_text(upload: &UploadedFile) -> Result<String, AppError> {
    let format = CvFormat::detect(&upload.content_type, &upload.data).ok_or_else(|| {
        AppError::UnprocessableEntity("CV must be a PDF or a plain-text file".to_string())
    })?;

    let raw = match format {
        CvFormat::PlainText => String::from_utf8_lossy(&upload.data).into_owned(),
        CvFormat::Pdf => {
            let data = upload.data.clone();
            read_pdf(move || pdf_extract::extract_text_from_mem(&data)).await?
        }
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "no text could be extracted from the CV".to_string(),
        ));
    }
    Ok(text)
}

/// Runs a PDF parser off the async runtime. A parser that panics on a malformed
/// document is reported the same way as one that returns an error.
async fn read_pdf<F, E>(parse: F) -> Result<String, AppError>
where
    F: FnOnce() -> Result<String, E> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(parse).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AppError::UnprocessableEntity(format!("could not read PDF: {e}"))),
        Err(e) => {
            debug!("PDF parser aborted: {e}");
            Err(AppError::UnprocessableEntity(
                "could not read PDF: the file is malformed".to_string(),
            ))
        }
    }
}

async fn analysis_for(
    state: &AppState,
    row: CvCacheRow,
    cached: bool,
) -> Result<CvAnalysis, AppError> {
    let entities: Vec<CvEntity> = serde_json::from_value(row.entities)
        .context("cached CV entities are malformed")?;
    let mut conn = state.db.acquire().await?;
    let taxonomy = all_skills(&mut conn).await?;

    Ok(CvAnalysis {
        cv_id: row.id,
        content_hash: row.content_hash,
        cached,
        entities,
        skills: resolve_skill_names(&taxonomy, &row.skills),
        analysed_at: row.updated_at,
    })
}

/// POST /api/v1/cv
///
/// Extracts the CV text, then serves entities and skills from the cache when the
/// same text was analysed before; otherwise asks the NLP service and stores the file.
pub async fn handle_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<CvAnalysis>, AppError> {
    let upload = read_file_field(&mut multipart).await?;
    let text = extract_text(&upload).await?;
    let hash = content_hash(&text);

    let hit = sqlx::query_as::<_, CvCacheRow>(
        r#"
        UPDATE cv_cache SET updated_at = now()
        WHERE user_id = $1 AND content_hash = $2
        RETURNING *
        "#,
    )
    .bind(auth.id())
    .bind(&hash)
    .fetch_optional(&state.db)
    .await?;

    if let Some(row) = hit {
        debug!("CV cache hit for user {} ({})", auth.id(), hash);
        return Ok(Json(analysis_for(&state, row, true).await?));
    }

    let (entities, skills) = tokio::try_join!(
        state.nlp.extract_entities(&text),
        state.nlp.extract_skills(&text),
    )?;

    let format = CvFormat::detect(&upload.content_type, &upload.data).unwrap_or(CvFormat::PlainText);
    let file_key = format!("cvs/{}/{}.{}", auth.id(), hash, format.extension());
    state
        .s3
        .put_object()
        .bucket(&state.config.s3_bucket)
        .key(&file_key)
        .body(ByteStream::from(upload.data.clone()))
        .content_type(upload.content_type.clone())
        .send()
        .await
        .map_err(|e| AppError::S3(format!("CV upload failed: {e}")))?;

    let row = sqlx::query_as::<_, CvCacheRow>(
        r#"
        INSERT INTO cv_cache (user_id, content_hash, file_key, raw_text, entities, skills)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, content_hash) DO UPDATE SET updated_at = now()
        RETURNING *
        "#,
    )
    .bind(auth.id())
    .bind(&hash)
    .bind(&file_key)
    .bind(&text)
    .bind(serde_json::to_value(&entities).context("serializing CV entities")?)
    .bind(&skills)
    .fetch_one(&state.db)
    .await?;

    info!(
        "Analysed CV for user {}: {} entities, {} skills, stored at {}",
        auth.id(),
        entities.len(),
        skills.len(),
        file_key
    );
    Ok(Json(analysis_for(&state, row, false).await?))
}

/// GET /api/v1/cv/latest
pub async fn handle_latest(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<CvAnalysis>, AppError> {
    let row = sqlx::query_as::<_, CvCacheRow>(
        "SELECT * FROM cv_cache WHERE user_id = $1 ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(auth.id())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("No CV has been uploaded yet".to_string()))?;

    Ok(Json(analysis_for(&state, row, true).await?))
}

/// POST /api/v1/cv/confirm
///
/// Adds the selected skills to the caller's profile. An existing proficiency is
/// only ever raised.
pub async fn handle_confirm(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<ConfirmSkillsRequest>,
) -> Result<Json<Vec<UserSkillRow>>, AppError> {
    let merged = merge_confirmations(&req.skills)?;
    let (skill_ids, levels): (Vec<Uuid>, Vec<i16>) = merged.into_iter().unzip();

    let mut tx = state.db.begin().await?;
    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE id = ANY($1)")
        .bind(&skill_ids)
        .fetch_one(&mut *tx)
        .await?;
    if known != skill_ids.len() as i64 {
        return Err(AppError::NotFound(
            "one or more selected skills no longer exist".to_string(),
        ));
    }

    let rows = sqlx::query_as::<_, UserSkillRow>(
        r#"
        INSERT INTO user_skills (user_id, skill_id, proficiency)
        SELECT $1, skill_id, proficiency
        FROM UNNEST($2::uuid[], $3::smallint[]) AS t(skill_id, proficiency)
        ON CONFLICT (user_id, skill_id) DO UPDATE
            SET proficiency = GREATEST(user_skills.proficiency, EXCLUDED.proficiency),
                updated_at = now()
        RETURNING *
        "#,
    )
    .bind(auth.id())
    .bind(&skill_ids)
    .bind(&levels)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    info!("User {} confirmed {} skill(s) from CV", auth.id(), rows.len());
    Ok(Json(rows))
}
