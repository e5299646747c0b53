// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::attempt::resolve_quiz,
    models::quiz::CreateQuizRequest,
    pricing,
    state::AppState,
    stores::idempotency,
    utils::jwt::Claims,
};

/// Creates a draft quiz.
///
/// Pricing is always derived from the difficulty tier on the server; a
/// client-supplied price would let callers undercut the policy table. With
/// an idempotency key, retried creates return the first quiz instead of
/// inserting twice.
pub async fn create_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key.clone() else {
        let value = do_create(&state.pool, user_id, &req).await?;
        return Ok((StatusCode::CREATED, Json(value)));
    };

    let key = idempotency::cache_key(user_id, "create-quiz", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        do_create(&pool, user_id, &req).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(value)))
}

async fn do_create(
    pool: &PgPool,
    user_id: i64,
    req: &CreateQuizRequest,
) -> Result<serde_json::Value, AppError> {
    let cfg = pricing::pricing_for(req.difficulty);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO quizzes
        (slug, title, difficulty, price_per_attempt, point_per_attempt, questions,
         duration_seconds, creator_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&req.slug)
    .bind(&req.title)
    .bind(req.difficulty)
    .bind(cfg.price_per_attempt)
    .bind(cfg.point_per_attempt)
    .bind(SqlJson(&req.questions))
    .bind(req.duration_seconds)
    .bind(user_id)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict(format!("Slug '{}' already exists", req.slug))
        } else {
            tracing::error!("Failed to create quiz: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok(serde_json::json!({
        "id": id,
        "slug": req.slug,
        "price_per_attempt": cfg.price_per_attempt,
        "point_per_attempt": cfg.point_per_attempt,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishQuizRequest {
    pub idempotency_key: Option<String>,
}

/// Publishes a quiz. Creator only. The flag flip itself is idempotent; the
/// cache just makes the retry observable as a replay.
pub async fn publish_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Json(req): Json<PublishQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key else {
        let value = do_publish(&state.pool, user_id, &identifier).await?;
        return Ok(Json(value));
    };

    let key = idempotency::cache_key(user_id, "publish-quiz", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        do_publish(&pool, user_id, &identifier).await
    })
    .await?;

    Ok(Json(value))
}

async fn do_publish(
    pool: &PgPool,
    user_id: i64,
    identifier: &str,
) -> Result<serde_json::Value, AppError> {
    let quiz = resolve_quiz(pool, identifier).await?;

    if quiz.creator_id != Some(user_id) {
        return Err(AppError::Forbidden(
            "Only the creator can publish this quiz".to_string(),
        ));
    }

    sqlx::query("UPDATE quizzes SET is_published = TRUE WHERE id = $1")
        .bind(quiz.id)
        .execute(pool)
        .await?;

    Ok(serde_json::json!({ "id": quiz.id, "is_published": true }))
}
