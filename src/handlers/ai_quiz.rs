// src/handlers/ai_quiz.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        quiz::{DifficultyLevel, GenerateQuizRequest},
        quota::QuotaKind,
    },
    pricing, quota,
    state::AppState,
    stores::idempotency,
    utils::jwt::Claims,
};

/// Current AI-generation quota for the caller.
pub async fn quota_status(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let status = quota::check_quota(&pool, claims.user_id()?, QuotaKind::AiGeneration).await?;
    Ok(Json(status))
}

/// Maps the 1-10 requested difficulty onto a pricing tier. AI drafts stay
/// on the non-premium tiers.
fn tier_for_level(level: i32) -> DifficultyLevel {
    match level {
        i32::MIN..=1 => DifficultyLevel::SuperEasy,
        2 => DifficultyLevel::Easy,
        3 | 4 => DifficultyLevel::Normal,
        5 | 6 => DifficultyLevel::Medium,
        7 | 8 => DifficultyLevel::Hard,
        _ => DifficultyLevel::Impossible,
    }
}

/// Generates an AI quiz draft.
///
/// The quota is consumed before the draft exists; if persisting the draft
/// fails downstream, the unit is refunded. The model call itself lives
/// behind the generation pipeline and is not part of this subsystem.
pub async fn generate_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GenerateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if req.question_count % 5 != 0 {
        return Err(AppError::BadRequest(
            "Question count must be a multiple of 5".to_string(),
        ));
    }

    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key.clone() else {
        let value = do_generate(&state.pool, user_id, &req).await?;
        return Ok((StatusCode::CREATED, Json(value)));
    };

    let key = idempotency::cache_key(user_id, "generate-quiz", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        do_generate(&pool, user_id, &req).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(value)))
}

async fn do_generate(
    pool: &PgPool,
    user_id: i64,
    req: &GenerateQuizRequest,
) -> Result<serde_json::Value, AppError> {
    if !quota::consume_quota(pool, user_id, QuotaKind::AiGeneration).await? {
        let status = quota::check_quota(pool, user_id, QuotaKind::AiGeneration).await?;
        return Err(AppError::RateLimited {
            remaining: status.remaining,
            limit: status.limit,
        });
    }

    let difficulty = tier_for_level(req.difficulty_level);
    let cfg = pricing::pricing_for(difficulty);
    let slug = format!("ai-{}", Uuid::new_v4().simple());

    let created: Result<i64, sqlx::Error> = sqlx::query_scalar(
        r#"
        INSERT INTO quizzes
        (slug, title, difficulty, price_per_attempt, point_per_attempt, questions,
         duration_seconds, creator_id)
        VALUES ($1, $2, $3, $4, $5, '[]', $6, $7)
        RETURNING id
        "#,
    )
    .bind(&slug)
    .bind(format!("AI quiz: {}", req.subject))
    .bind(difficulty)
    .bind(cfg.price_per_attempt)
    .bind(cfg.point_per_attempt)
    .bind(req.question_count * 60)
    .bind(user_id)
    .fetch_one(pool)
    .await;

    let quiz_id = match created {
        Ok(id) => id,
        Err(e) => {
            // The quota was already spent on a draft that never landed.
            if let Err(refund_err) = quota::refund_quota(pool, user_id, QuotaKind::AiGeneration).await
            {
                tracing::warn!("Failed to refund generation quota: {}", refund_err);
            }
            tracing::error!("Failed to persist AI quiz draft: {:?}", e);
            return Err(AppError::InternalServerError(e.to_string()));
        }
    };

    let status = quota::check_quota(pool, user_id, QuotaKind::AiGeneration).await?;

    Ok(serde_json::json!({
        "quiz_id": quiz_id,
        "slug": slug,
        "difficulty": difficulty,
        "remaining": status.remaining,
        "limit": status.limit,
    }))
}
