// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::quota::QuotaKind,
    quota,
    utils::jwt::Claims,
};

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewVerdictRequest {
    #[validate(range(min = 0))]
    pub marks_awarded: i64,
}

/// Records a manual-review verdict for one queued response.
/// Admin only. Rate-limited through the quota ledger (ADMIN_ACTION kind):
/// the same atomic conditional increment as the attempt/generation quotas,
/// so the limit holds across any number of service instances.
pub async fn review_item(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(item_id): Path<i64>,
    Json(req): Json<ReviewVerdictRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let admin_id = claims.user_id()?;

    if !quota::consume_quota(&pool, admin_id, QuotaKind::AdminAction).await? {
        let status = quota::check_quota(&pool, admin_id, QuotaKind::AdminAction).await?;
        return Err(AppError::RateLimited {
            remaining: status.remaining,
            limit: status.limit,
        });
    }

    let result = sqlx::query(
        r#"
        UPDATE manual_review_queue
        SET marks_awarded = $2, reviewed = TRUE
        WHERE id = $1 AND reviewed = FALSE
        "#,
    )
    .bind(item_id)
    .bind(req.marks_awarded)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM manual_review_queue WHERE id = $1")
                .bind(item_id)
                .fetch_optional(&pool)
                .await?;

        return Err(match exists {
            Some(_) => AppError::Conflict("Item already reviewed".to_string()),
            None => AppError::NotFound("Review item not found".to_string()),
        });
    }

    Ok(Json(serde_json::json!({
        "id": item_id,
        "reviewed": true,
        "marks_awarded": req.marks_awarded,
    })))
}
