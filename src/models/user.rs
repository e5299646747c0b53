// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account tier. Drives daily quotas and premium-quiz access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Free,
    Premium,
    Lifetime,
}

/// Represents the 'users' table in the database.
///
/// Points/XP are only ever mutated by addition (scoring engine, payment
/// reconciliation); this subsystem never deletes users.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    pub name: String,

    /// User role: 'user' or 'admin'.
    pub role: String,

    pub account_type: AccountType,

    /// Premium expiry; only meaningful for PREMIUM accounts.
    pub premium_until: Option<chrono::DateTime<chrono::Utc>>,

    /// Cumulative quiz points.
    pub points: i64,

    /// Cumulative XP, drives the rank tier.
    pub xp: i64,

    /// Index into the fixed rank-tier table.
    pub rank_tier: i32,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Append-only snapshot written when a scoring update crosses a rank-tier
/// boundary.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RankHistoryEntry {
    pub id: i64,
    pub user_id: i64,
    pub old_rank: i32,
    pub new_rank: i32,
    pub old_xp: i64,
    pub new_xp: i64,
    pub changed_at: Option<chrono::DateTime<chrono::Utc>>,
}
