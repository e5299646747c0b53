// src/handlers/payment.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::attempt::resolve_quiz,
    models::payment::{
        OrderResponse, PurchaseRequest, SubscribeRequest, TransactionStatus, TransactionType,
        VerifyPaymentRequest, WebhookEvent,
    },
    pricing,
    state::AppState,
    stores::idempotency,
    utils::jwt::Claims,
};

/// Premium subscription price, in the store currency's smallest sensible
/// unit for display (INR).
const PREMIUM_SUBSCRIPTION_PRICE: i64 = 400;

/// Window in which an existing pending order is reused instead of creating
/// a duplicate.
const PENDING_ORDER_REUSE_MINUTES: i64 = 15;

#[derive(sqlx::FromRow)]
struct CapturedTransaction {
    user_id: i64,
    tx_type: TransactionType,
    quiz_id: Option<i64>,
}

/// Creates (or reuses) a pending premium-subscription order.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key else {
        let value = do_subscribe(&state.pool, user_id).await?;
        return Ok(Json(value));
    };

    let key = idempotency::cache_key(user_id, "subscribe", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        do_subscribe(&pool, user_id).await
    })
    .await?;

    Ok(Json(value))
}

async fn do_subscribe(pool: &PgPool, user_id: i64) -> Result<serde_json::Value, AppError> {
    let premium: Option<(Option<chrono::DateTime<Utc>>,)> =
        sqlx::query_as("SELECT premium_until FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    let premium_until = premium
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
        .0;

    if premium_until.is_some_and(|until| until > Utc::now()) {
        return Err(AppError::BadRequest(
            "Premium subscription already active".to_string(),
        ));
    }

    // A recent pending order is reused; paying twice for one intent is the
    // failure mode this guards.
    let existing: Option<(String, i64, String)> = sqlx::query_as(
        r#"
        SELECT order_ref, amount, currency FROM payment_transactions
        WHERE user_id = $1 AND status = 'PENDING' AND tx_type = 'PREMIUM_SUBSCRIPTION'
          AND created_at >= $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(Utc::now() - Duration::minutes(PENDING_ORDER_REUSE_MINUTES))
    .fetch_optional(pool)
    .await?;

    if let Some((order_ref, amount, currency)) = existing {
        return Ok(serde_json::to_value(OrderResponse {
            order_ref,
            amount,
            currency,
        })?);
    }

    let order_ref = format!("order_{}", Uuid::new_v4().simple());
    sqlx::query(
        r#"
        INSERT INTO payment_transactions (user_id, order_ref, amount, currency, status, tx_type)
        VALUES ($1, $2, $3, 'INR', 'PENDING', 'PREMIUM_SUBSCRIPTION')
        "#,
    )
    .bind(user_id)
    .bind(&order_ref)
    .bind(PREMIUM_SUBSCRIPTION_PRICE)
    .execute(pool)
    .await?;

    Ok(serde_json::to_value(OrderResponse {
        order_ref,
        amount: PREMIUM_SUBSCRIPTION_PRICE,
        currency: "INR".to_string(),
    })?)
}

/// Creates a pending purchase order for a priced quiz.
pub async fn purchase_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Json(req): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let Some(token) = req.idempotency_key else {
        let value = do_purchase(&state.pool, user_id, &identifier).await?;
        return Ok(Json(value));
    };

    let key = idempotency::cache_key(user_id, "purchase-quiz", &token);
    let pool = state.pool.clone();
    let value = idempotency::run_protected(&state.idempotency, &key, || async move {
        do_purchase(&pool, user_id, &identifier).await
    })
    .await?;

    Ok(Json(value))
}

async fn do_purchase(
    pool: &PgPool,
    user_id: i64,
    identifier: &str,
) -> Result<serde_json::Value, AppError> {
    let quiz = resolve_quiz(pool, identifier).await?;
    let cfg = pricing::pricing_for(quiz.difficulty);

    if cfg.price_per_attempt == 0 {
        return Err(AppError::BadRequest("Quiz is free to attempt".to_string()));
    }

    let unlocked: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM quiz_unlocks WHERE user_id = $1 AND quiz_id = $2")
            .bind(user_id)
            .bind(quiz.id)
            .fetch_optional(pool)
            .await?;

    if unlocked.is_some() {
        return Err(AppError::Conflict("Quiz already unlocked".to_string()));
    }

    let order_ref = format!("order_{}", Uuid::new_v4().simple());
    sqlx::query(
        r#"
        INSERT INTO payment_transactions
        (user_id, order_ref, amount, currency, status, tx_type, quiz_id)
        VALUES ($1, $2, $3, 'INR', 'PENDING', 'QUIZ_PURCHASE', $4)
        "#,
    )
    .bind(user_id)
    .bind(&order_ref)
    .bind(cfg.price_per_attempt)
    .bind(quiz.id)
    .execute(pool)
    .await?;

    Ok(serde_json::to_value(OrderResponse {
        order_ref,
        amount: cfg.price_per_attempt,
        currency: "INR".to_string(),
    })?)
}

/// Explicit verify call after the client finished the gateway flow.
/// Signature verification happened in the gateway integration layer; this
/// endpoint owns the PENDING -> CAPTURED transition and its effects.
pub async fn verify_payment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let tx: Option<(i64, TransactionStatus)> = sqlx::query_as(
        "SELECT user_id, status FROM payment_transactions WHERE order_ref = $1",
    )
    .bind(&req.order_ref)
    .fetch_optional(&pool)
    .await?;

    let (owner, status) =
        tx.ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;

    if owner != user_id {
        return Err(AppError::Forbidden(
            "Transaction belongs to another user".to_string(),
        ));
    }

    if status == TransactionStatus::Captured {
        // Re-verify of a finished transaction is a success, not an error.
        return Ok(Json(serde_json::json!({
            "success": true,
            "message": "Already captured",
        })));
    }

    let captured = capture_by_order(&pool, &req.order_ref, Some(&req.payment_ref)).await?;
    if captured.is_none() {
        return Err(AppError::Conflict(
            "Transaction is not pending".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Gateway webhook receiver. Events arrive at-least-once; every effect is
/// keyed on the conditional status transition, so redelivery is a no-op.
pub async fn payment_webhook(
    State(pool): State<PgPool>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse, AppError> {
    match event.event.as_str() {
        "payment.captured" => {
            if let Some(payment) = event.payload.payment {
                capture_by_order(&pool, &payment.entity.order_id, Some(&payment.entity.id))
                    .await?;
            }
        }
        "payment.failed" => {
            if let Some(payment) = event.payload.payment {
                sqlx::query(
                    r#"
                    UPDATE payment_transactions
                    SET status = 'FAILED', payment_ref = $2
                    WHERE order_ref = $1 AND status = 'PENDING'
                    "#,
                )
                .bind(&payment.entity.order_id)
                .bind(&payment.entity.id)
                .execute(&pool)
                .await?;
            }
        }
        "order.paid" => {
            if let Some(order) = event.payload.order {
                capture_by_order(&pool, &order.entity.id, None).await?;
            }
        }
        other => {
            tracing::info!("Unhandled payment webhook event: {}", other);
        }
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// The one PENDING -> CAPTURED transition. Returns the transaction row only
/// when this call actually performed the transition; side effects
/// (unlock upsert, premium activation) run exactly then.
async fn capture_by_order(
    pool: &PgPool,
    order_ref: &str,
    payment_ref: Option<&str>,
) -> Result<Option<CapturedTransaction>, AppError> {
    let captured: Option<CapturedTransaction> = sqlx::query_as(
        r#"
        UPDATE payment_transactions
        SET status = 'CAPTURED', payment_ref = COALESCE($2, payment_ref)
        WHERE order_ref = $1 AND status = 'PENDING'
        RETURNING user_id, tx_type, quiz_id
        "#,
    )
    .bind(order_ref)
    .bind(payment_ref)
    .fetch_optional(pool)
    .await?;

    if let Some(tx) = &captured {
        apply_capture_effects(pool, tx).await?;
    }

    Ok(captured)
}

async fn apply_capture_effects(
    pool: &PgPool,
    tx: &CapturedTransaction,
) -> Result<(), AppError> {
    match tx.tx_type {
        TransactionType::QuizPurchase => {
            let Some(quiz_id) = tx.quiz_id else {
                tracing::error!(
                    "Captured quiz purchase for user {} has no quiz id",
                    tx.user_id
                );
                return Ok(());
            };

            // Upsert keyed on (user_id, quiz_id): a duplicate unlock is
            // structurally impossible.
            sqlx::query(
                r#"
                INSERT INTO quiz_unlocks (user_id, quiz_id)
                VALUES ($1, $2)
                ON CONFLICT (user_id, quiz_id) DO NOTHING
                "#,
            )
            .bind(tx.user_id)
            .bind(quiz_id)
            .execute(pool)
            .await?;
        }
        TransactionType::PremiumSubscription => {
            sqlx::query(
                r#"
                UPDATE users
                SET account_type = 'PREMIUM',
                    premium_until = GREATEST(COALESCE(premium_until, now()), now()) + INTERVAL '30 days'
                WHERE id = $1 AND account_type <> 'LIFETIME'
                "#,
            )
            .bind(tx.user_id)
            .execute(pool)
            .await?;

            tracing::info!("Premium activated for user {}", tx.user_id);
        }
    }

    Ok(())
}
