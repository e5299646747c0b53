// src/models/quota.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The kinds of daily quota tracked per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "quota_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaKind {
    QuizAttempt,
    AiGeneration,
    AdminAction,
}

/// Represents one row of the 'quota_ledger' table.
/// `daily_limit` is a snapshot of the policy at last touch; the atomic
/// consume step always recomputes it from the user's current account tier.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaLedgerEntry {
    pub user_id: i64,
    pub kind: QuotaKind,
    pub daily_used: i64,
    pub daily_limit: i64,
    pub total_used: i64,
    pub last_reset_date: chrono::NaiveDate,
}

/// Client-facing quota snapshot.
#[derive(Debug, Serialize)]
pub struct QuotaStatus {
    pub has_quota: bool,
    pub remaining: i64,
    pub limit: i64,
    pub reset_at: chrono::DateTime<chrono::Utc>,
    pub used_today: i64,
    pub used_total: i64,
}
