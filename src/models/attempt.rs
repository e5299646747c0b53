// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Lifecycle state of a quiz attempt. There is no transition out of
/// COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

/// Represents the 'quiz_records' table: one user's timed session of
/// answering a quiz. At most one IN_PROGRESS row may exist per
/// (user_id, quiz_id); a partial unique index enforces this.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizRecord {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub status: AttemptStatus,
    pub responses: Option<Json<Vec<SubmittedResponse>>>,
    pub score: i64,
    pub earned_points: i64,
    pub duration: i64,
    pub is_flagged: bool,
    pub is_manual_review_pending: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub date_taken: Option<chrono::DateTime<chrono::Utc>>,
}

/// Append-only proctoring violation row, created at submit time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ViolationRecord {
    pub id: i64,
    pub quiz_record_id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub violation_type: String,
    pub reason: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One response deferred to human grading; created at submit time, the
/// verdict fields are filled in later by the reviewer workflow.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ManualReviewItem {
    pub id: i64,
    pub quiz_record_id: i64,
    pub question_id: String,
    pub user_id: i64,
    pub quiz_id: i64,
    pub answer: Json<serde_json::Value>,
    pub kind: String,
    pub marks_awarded: Option<i64>,
    pub reviewed: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for starting an attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(length(min = 1, max = 256))]
    pub fingerprint: String,
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: i64,
    pub session_id: uuid::Uuid,
    pub remaining_attempts: i64,
    pub daily_limit: i64,
}

/// Result of the read-only eligibility check.
#[derive(Debug, Serialize)]
pub struct ValidateAttemptResponse {
    pub can_attempt: bool,
    pub remaining_attempts: i64,
    pub daily_limit: i64,
    pub requires_payment: bool,
    pub is_unlocked: bool,
}

/// One answered question as submitted by the client. The kind and marks
/// come from the stored answer key, never from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedResponse {
    pub question_id: String,
    #[serde(default)]
    pub answer: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttemptSummary {
    #[validate(range(min = 0))]
    pub duration_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReportedViolation {
    pub violation_type: String,
    pub reason: String,
}

/// DTO for submitting an attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    pub attempt_id: i64,
    pub responses: Vec<SubmittedResponse>,
    #[validate(nested)]
    pub summary: AttemptSummary,
    #[serde(default)]
    pub violations: Vec<ReportedViolation>,
    /// Optional token making the whole submit safe to retry.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: i64,
    pub score: i64,
    pub total_marks: i64,
    pub earned_points: i64,
    pub manual_review_pending: bool,
    pub flagged: bool,
    pub new_rank: Option<i32>,
}
