// src/handlers/attempt.rs

use std::sync::LazyLock;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sqlx::{PgPool, types::Json as SqlJson};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    grading::{self, GradedSubmission},
    models::{
        attempt::{
            AttemptStatus, QuizRecord, StartAttemptRequest, StartAttemptResponse,
            SubmitAttemptRequest, SubmitAttemptResponse, ValidateAttemptResponse,
        },
        quiz::Quiz,
        quota::QuotaKind,
        user::User,
    },
    pricing,
    state::AppState,
    stores::idempotency,
    utils::{jwt::Claims, rank},
};

/// Shareable quiz-link sessions stay valid for one hour.
const SESSION_MAX_AGE_SECS: i64 = 60 * 60;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("static regex"));

/// Resolves a quiz by numeric id or slug.
pub async fn resolve_quiz(pool: &PgPool, identifier: &str) -> Result<Quiz, AppError> {
    let quiz: Option<Quiz> = if let Ok(id) = identifier.parse::<i64>() {
        sqlx::query_as("SELECT * FROM quizzes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
    } else if SLUG_RE.is_match(identifier) {
        sqlx::query_as("SELECT * FROM quizzes WHERE slug = $1")
            .bind(identifier)
            .fetch_optional(pool)
            .await?
    } else {
        None
    };

    quiz.ok_or_else(|| AppError::NotFound(format!("Quiz '{}' not found", identifier)))
}

async fn fetch_user(pool: &PgPool, user_id: i64) -> Result<User, AppError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    user.ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Facts needed to gate a start call. Computed fresh on every call; nothing
/// here is cached between requests.
struct Eligibility {
    daily_limit: i64,
    remaining_attempts: i64,
    requires_payment: bool,
    is_unlocked: bool,
}

async fn compute_eligibility(
    pool: &PgPool,
    user: &User,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<Eligibility, AppError> {
    let cfg = pricing::pricing_for(quiz.difficulty);
    let premium_ok = pricing::can_access_premium(user.account_type, user.premium_until, now);

    let has_unlock: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM quiz_unlocks WHERE user_id = $1 AND quiz_id = $2")
            .bind(user.id)
            .bind(quiz.id)
            .fetch_optional(pool)
            .await?;

    let premium_blocked = cfg.requires_premium && !premium_ok;
    let is_unlocked = cfg.price_per_attempt == 0
        || has_unlock.is_some()
        || (cfg.requires_premium && premium_ok);
    let requires_payment = premium_blocked || !is_unlocked;

    // Attempts already taken today for this (user, quiz), by UTC day.
    let today_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let taken_today: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM quiz_records
        WHERE user_id = $1 AND quiz_id = $2 AND created_at >= $3 AND created_at < $4
        "#,
    )
    .bind(user.id)
    .bind(quiz.id)
    .bind(today_start)
    .bind(today_start + Duration::days(1))
    .fetch_one(pool)
    .await?;

    let daily_limit = pricing::daily_limit_for(user.account_type, QuotaKind::QuizAttempt);

    Ok(Eligibility {
        daily_limit,
        remaining_attempts: (daily_limit - taken_today.0).max(0),
        requires_payment,
        is_unlocked,
    })
}

/// Client IP as reported by the proxy layer.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Read-only eligibility check: can this user attempt this quiz right now?
pub async fn validate_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = fetch_user(&pool, claims.user_id()?).await?;
    let quiz = resolve_quiz(&pool, &identifier).await?;
    if !quiz.is_published {
        return Err(AppError::NotFound(format!("Quiz '{}' not found", identifier)));
    }

    let eligibility = compute_eligibility(&pool, &user, &quiz, Utc::now()).await?;

    Ok(Json(ValidateAttemptResponse {
        can_attempt: !eligibility.requires_payment && eligibility.remaining_attempts > 0,
        remaining_attempts: eligibility.remaining_attempts,
        daily_limit: eligibility.daily_limit,
        requires_payment: eligibility.requires_payment,
        is_unlocked: eligibility.is_unlocked,
    }))
}

/// Starts an attempt: eligibility gates, then an exclusive create.
///
/// The partial unique index on (user_id, quiz_id, status = IN_PROGRESS) is
/// the only thing preventing a duplicate attempt; concurrent starts race on
/// the insert and the loser gets 409 with the surviving attempt's id.
pub async fn start_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user = fetch_user(&pool, claims.user_id()?).await?;
    let quiz = resolve_quiz(&pool, &identifier).await?;
    if !quiz.is_published {
        return Err(AppError::NotFound(format!("Quiz '{}' not found", identifier)));
    }

    let eligibility = compute_eligibility(&pool, &user, &quiz, Utc::now()).await?;

    if eligibility.requires_payment {
        return Err(AppError::PaymentRequired(
            "This quiz requires a purchase or an active premium subscription".to_string(),
        ));
    }

    if eligibility.remaining_attempts <= 0 {
        return Err(AppError::RateLimited {
            remaining: 0,
            limit: eligibility.daily_limit,
        });
    }

    // Exclusive create. DO NOTHING on the partial index means a concurrent
    // winner already holds the IN_PROGRESS slot.
    let created: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO quiz_records (user_id, quiz_id, status)
        VALUES ($1, $2, 'IN_PROGRESS')
        ON CONFLICT (user_id, quiz_id) WHERE status = 'IN_PROGRESS' DO NOTHING
        RETURNING id
        "#,
    )
    .bind(user.id)
    .bind(quiz.id)
    .fetch_optional(&pool)
    .await?;

    let attempt_id = match created {
        Some((id,)) => id,
        None => {
            let existing: Option<(i64,)> = sqlx::query_as(
                r#"
                SELECT id FROM quiz_records
                WHERE user_id = $1 AND quiz_id = $2 AND status = 'IN_PROGRESS'
                "#,
            )
            .bind(user.id)
            .bind(quiz.id)
            .fetch_optional(&pool)
            .await?;

            return Err(match existing {
                Some((id,)) => AppError::Conflict(format!(
                    "Attempt {} is already in progress for this quiz",
                    id
                )),
                None => AppError::Conflict(
                    "An attempt for this quiz was just completed; start again".to_string(),
                ),
            });
        }
    };

    // Ephemeral session binding the shareable quiz-taking link.
    let session_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO quiz_link_sessions (id, user_id, quiz_id, fingerprint, device_info, ip)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(session_id)
    .bind(user.id)
    .bind(quiz.id)
    .bind(&req.fingerprint)
    .bind(req.device_info.map(SqlJson))
    .bind(client_ip(&headers))
    .execute(&pool)
    .await?;

    Ok(Json(StartAttemptResponse {
        attempt_id,
        session_id,
        remaining_attempts: eligibility.remaining_attempts - 1,
        daily_limit: eligibility.daily_limit,
    }))
}

/// Helper struct for loading a quiz-link session row.
#[derive(sqlx::FromRow)]
struct LinkSession {
    quiz_id: i64,
    ip: String,
    is_active: bool,
    created_at: Option<DateTime<Utc>>,
}

/// Validates a shareable quiz-link session. IP mismatch and expiry both
/// deactivate the session permanently; this is a security control, not a
/// retry path.
pub async fn validate_session(
    State(pool): State<PgPool>,
    Path((identifier, session_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let quiz = resolve_quiz(&pool, &identifier).await?;

    let session: Option<LinkSession> = sqlx::query_as(
        "SELECT quiz_id, ip, is_active, created_at FROM quiz_link_sessions WHERE id = $1",
    )
    .bind(session_id)
    .fetch_optional(&pool)
    .await?;

    let session = match session {
        Some(s) if s.is_active && s.quiz_id == quiz.id => s,
        _ => return Err(AppError::NotFound("Session not found or inactive".to_string())),
    };

    let ip = client_ip(&headers);
    if session.ip != "unknown" && ip != "unknown" && session.ip != ip {
        deactivate_session(&pool, session_id).await?;
        return Err(AppError::Forbidden("Session IP mismatch".to_string()));
    }

    let created_at = session.created_at.unwrap_or_else(Utc::now);
    if Utc::now() - created_at > Duration::seconds(SESSION_MAX_AGE_SECS) {
        deactivate_session(&pool, session_id).await?;
        return Err(AppError::Forbidden("Session expired".to_string()));
    }

    Ok(Json(serde_json::json!({ "valid": true })))
}

async fn deactivate_session(pool: &PgPool, session_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE quiz_link_sessions SET is_active = FALSE WHERE id = $1")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Submits an attempt.
///
/// With an idempotency key the whole operation is deduplicated through the
/// shared cache, so an at-least-once client can safely retry after a lost
/// response. Without one, a second submit of the same attempt is a 409.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key.clone() else {
        let response = do_submit(&state.pool, user_id, &identifier, &req).await?;
        return Ok(Json(serde_json::to_value(&response)?));
    };

    let key = idempotency::cache_key(user_id, "submit-attempt", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        let response = do_submit(&pool, user_id, &identifier, &req).await?;
        serde_json::to_value(&response).map_err(|e| AppError::InternalServerError(e.to_string()))
    })
    .await?;

    Ok(Json(value))
}

async fn do_submit(
    pool: &PgPool,
    user_id: i64,
    identifier: &str,
    req: &SubmitAttemptRequest,
) -> Result<SubmitAttemptResponse, AppError> {
    let quiz = resolve_quiz(pool, identifier).await?;

    let record: Option<QuizRecord> = sqlx::query_as("SELECT * FROM quiz_records WHERE id = $1")
        .bind(req.attempt_id)
        .fetch_optional(pool)
        .await?;

    let record = record.ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    if record.user_id != user_id {
        return Err(AppError::Forbidden(
            "Attempt belongs to another user".to_string(),
        ));
    }
    if record.quiz_id != quiz.id {
        return Err(AppError::NotFound(
            "Attempt does not belong to this quiz".to_string(),
        ));
    }
    if record.status == AttemptStatus::Completed {
        return Err(AppError::Conflict("Attempt already completed".to_string()));
    }

    let graded = grading::grade_submission(&quiz.questions.0, &req.responses);
    let cfg = pricing::pricing_for(quiz.difficulty);
    let earned = pricing::earned_points(graded.obtained_marks, graded.total_marks, cfg.point_per_attempt);
    let flagged = !req.violations.is_empty();

    let new_rank = persist_submission(pool, &record, req, &graded, earned, flagged).await?;

    // Audit rows are best-effort: the terminal transition above is the
    // authoritative outcome, a missing audit row is recoverable by
    // reconciliation tooling.
    write_audit_rows(pool, &record, req, &graded).await;

    Ok(SubmitAttemptResponse {
        attempt_id: record.id,
        score: graded.obtained_marks,
        total_marks: graded.total_marks,
        earned_points: earned,
        manual_review_pending: graded.manual_review_pending(),
        flagged,
        new_rank,
    })
}

/// One transaction: the terminal state transition plus the scoring and
/// progression update. Either both commit or neither does.
async fn persist_submission(
    pool: &PgPool,
    record: &QuizRecord,
    req: &SubmitAttemptRequest,
    graded: &GradedSubmission,
    earned: i64,
    flagged: bool,
) -> Result<Option<i32>, AppError> {
    let mut tx = pool.begin().await?;

    let transitioned = sqlx::query(
        r#"
        UPDATE quiz_records
        SET status = 'COMPLETED',
            responses = $2,
            score = $3,
            earned_points = $4,
            duration = $5,
            is_flagged = $6,
            is_manual_review_pending = $7,
            date_taken = now()
        WHERE id = $1 AND status = 'IN_PROGRESS'
        "#,
    )
    .bind(record.id)
    .bind(SqlJson(&req.responses))
    .bind(graded.obtained_marks)
    .bind(earned)
    .bind(req.summary.duration_seconds)
    .bind(flagged)
    .bind(graded.manual_review_pending())
    .execute(&mut *tx)
    .await?;

    if transitioned.rows_affected() == 0 {
        // A concurrent submit won the conditional update.
        return Err(AppError::Conflict("Attempt already completed".to_string()));
    }

    // Scoring & progression: add, never overwrite.
    let (new_xp, stored_rank): (i64, i32) = sqlx::query_as(
        r#"
        UPDATE users
        SET points = points + $2, xp = xp + $2
        WHERE id = $1
        RETURNING xp, rank_tier
        "#,
    )
    .bind(record.user_id)
    .bind(earned)
    .fetch_one(&mut *tx)
    .await?;

    let old_xp = new_xp - earned;
    let (new_rank, _) = rank::rank_for_xp(new_xp);

    let crossed = new_rank != stored_rank;
    if crossed {
        sqlx::query(
            r#"
            INSERT INTO rank_history (user_id, old_rank, new_rank, old_xp, new_xp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.user_id)
        .bind(stored_rank)
        .bind(new_rank)
        .bind(old_xp)
        .bind(new_xp)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET rank_tier = $2 WHERE id = $1")
            .bind(record.user_id)
            .bind(new_rank)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(crossed.then_some(new_rank))
}

/// Appends violation and manual-review rows. Failures are logged and
/// swallowed; they never roll back the completed attempt.
async fn write_audit_rows(
    pool: &PgPool,
    record: &QuizRecord,
    req: &SubmitAttemptRequest,
    graded: &GradedSubmission,
) {
    for violation in &req.violations {
        let result = sqlx::query(
            r#"
            INSERT INTO quiz_violations (quiz_record_id, user_id, quiz_id, violation_type, reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.quiz_id)
        .bind(&violation.violation_type)
        .bind(&violation.reason)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to persist violation for attempt {}: {}", record.id, e);
        }
    }

    for deferred in &graded.deferred {
        let result = sqlx::query(
            r#"
            INSERT INTO manual_review_queue (quiz_record_id, question_id, user_id, quiz_id, answer, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&deferred.question_id)
        .bind(record.user_id)
        .bind(record.quiz_id)
        .bind(SqlJson(&deferred.answer))
        .bind(deferred.kind)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                "Failed to enqueue manual review for attempt {} question {}: {}",
                record.id,
                deferred.question_id,
                e
            );
        }
    }
}
