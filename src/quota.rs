// src/quota.rs

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        quota::{QuotaKind, QuotaLedgerEntry, QuotaStatus},
        user::AccountType,
    },
    pricing,
};

/// Next UTC midnight; when the daily counters roll over.
pub fn next_reset_at(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

async fn account_type_for(pool: &PgPool, user_id: i64) -> Result<AccountType, AppError> {
    let account_type: Option<(AccountType,)> =
        sqlx::query_as("SELECT account_type FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    account_type
        .map(|row| row.0)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Ensures the ledger row exists and lazily resets it when its last touch
/// was on an earlier UTC day. Both statements are single conditional
/// writes, so any number of concurrent callers converge on the same state.
async fn ensure_current_row(
    pool: &PgPool,
    user_id: i64,
    kind: QuotaKind,
    limit: i64,
) -> Result<(), AppError> {
    let today = Utc::now().date_naive();

    sqlx::query(
        r#"
        INSERT INTO quota_ledger (user_id, kind, daily_used, daily_limit, total_used, last_reset_date)
        VALUES ($1, $2, 0, $3, 0, $4)
        ON CONFLICT (user_id, kind) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(limit)
    .bind(today)
    .execute(pool)
    .await?;

    // Lazy day-boundary reset, applied on first touch of a new day.
    sqlx::query(
        r#"
        UPDATE quota_ledger
        SET daily_used = 0, last_reset_date = $3
        WHERE user_id = $1 AND kind = $2 AND last_reset_date < $3
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(today)
    .execute(pool)
    .await?;

    Ok(())
}

/// Reads the current quota state for (user, kind), resetting stale daily
/// counters first and refreshing the limit snapshot from the user's current
/// account tier.
pub async fn check_quota(
    pool: &PgPool,
    user_id: i64,
    kind: QuotaKind,
) -> Result<QuotaStatus, AppError> {
    let account_type = account_type_for(pool, user_id).await?;
    let limit = pricing::daily_limit_for(account_type, kind);

    ensure_current_row(pool, user_id, kind, limit).await?;

    let entry: QuotaLedgerEntry = sqlx::query_as(
        r#"
        UPDATE quota_ledger
        SET daily_limit = $3
        WHERE user_id = $1 AND kind = $2
        RETURNING user_id, kind, daily_used, daily_limit, total_used, last_reset_date
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(limit)
    .fetch_one(pool)
    .await?;

    let remaining = (limit - entry.daily_used).max(0);

    Ok(QuotaStatus {
        has_quota: remaining > 0,
        remaining,
        limit,
        reset_at: next_reset_at(Utc::now()),
        used_today: entry.daily_used,
        used_total: entry.total_used,
    })
}

/// Consumes one unit of quota. The increment-if-below-limit is a single
/// conditional UPDATE executed by Postgres, so N concurrent callers with
/// limit L succeed exactly min(N, L) times. The limit is recomputed from
/// the user's current account tier, not from the ledger snapshot.
///
/// Returns Ok(false) when the quota is exhausted. Store failures propagate
/// as Internal; they are never reported as a quota verdict.
pub async fn consume_quota(pool: &PgPool, user_id: i64, kind: QuotaKind) -> Result<bool, AppError> {
    let account_type = account_type_for(pool, user_id).await?;
    let limit = pricing::daily_limit_for(account_type, kind);

    ensure_current_row(pool, user_id, kind, limit).await?;

    let result = sqlx::query(
        r#"
        UPDATE quota_ledger
        SET daily_used = daily_used + 1,
            total_used = total_used + 1,
            daily_limit = $3
        WHERE user_id = $1 AND kind = $2 AND daily_used < $3
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Returns one unit of quota, floored at zero. Used when a quota-consuming
/// operation fails downstream after the quota was already spent.
pub async fn refund_quota(pool: &PgPool, user_id: i64, kind: QuotaKind) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE quota_ledger
        SET daily_used = GREATEST(daily_used - 1, 0),
            total_used = GREATEST(total_used - 1, 0)
        WHERE user_id = $1 AND kind = $2
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .execute(pool)
    .await?;

    Ok(())
}
