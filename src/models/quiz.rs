// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Difficulty tier of a quiz. The full set the content system uses;
/// pricing and premium gating derive from it (see `crate::pricing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "difficulty_level", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyLevel {
    SuperEasy,
    Easy,
    Normal,
    Medium,
    Hard,
    Impossible,
    Insane,
    JeeMain,
    JeeAdvanced,
    NeetUg,
    UpscCse,
    Gate,
    Cat,
    Clat,
    Ca,
    Gaokao,
    Gre,
    Gmat,
    Usmle,
    Lnat,
    Mcat,
    Cfa,
    GodLevel,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 23] = [
        DifficultyLevel::SuperEasy,
        DifficultyLevel::Easy,
        DifficultyLevel::Normal,
        DifficultyLevel::Medium,
        DifficultyLevel::Hard,
        DifficultyLevel::Impossible,
        DifficultyLevel::Insane,
        DifficultyLevel::JeeMain,
        DifficultyLevel::JeeAdvanced,
        DifficultyLevel::NeetUg,
        DifficultyLevel::UpscCse,
        DifficultyLevel::Gate,
        DifficultyLevel::Cat,
        DifficultyLevel::Clat,
        DifficultyLevel::Ca,
        DifficultyLevel::Gaokao,
        DifficultyLevel::Gre,
        DifficultyLevel::Gmat,
        DifficultyLevel::Usmle,
        DifficultyLevel::Lnat,
        DifficultyLevel::Mcat,
        DifficultyLevel::Cfa,
        DifficultyLevel::GodLevel,
    ];
}

/// Question type. Determines whether a response can be auto-graded or has
/// to be deferred to the manual review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Single,
    Multiple,
    Boolean,
    Fill,
    Numeric,
    Essay,
    Paragraph,
    Audio,
    Video,
    Poll,
}

impl QuestionKind {
    /// Types that require human grading.
    pub fn requires_manual_review(self) -> bool {
        matches!(
            self,
            QuestionKind::Essay
                | QuestionKind::Paragraph
                | QuestionKind::Audio
                | QuestionKind::Video
                | QuestionKind::Poll
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Single => "single",
            QuestionKind::Multiple => "multiple",
            QuestionKind::Boolean => "boolean",
            QuestionKind::Fill => "fill",
            QuestionKind::Numeric => "numeric",
            QuestionKind::Essay => "essay",
            QuestionKind::Paragraph => "paragraph",
            QuestionKind::Audio => "audio",
            QuestionKind::Video => "video",
            QuestionKind::Poll => "poll",
        }
    }
}

/// One entry of a quiz's answer key, stored in the `questions` JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub kind: QuestionKind,
    /// Correct answer for auto-gradable kinds; compared by structural
    /// equality against the submitted value. Null for manual kinds.
    #[serde(default)]
    pub correct_answer: serde_json::Value,
    pub marks: i64,
}

/// Represents the 'quizzes' table in the database.
/// Read-mostly to this subsystem; rows are created by the (idempotency
/// protected) create/generate endpoints and flipped by publish.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub difficulty: DifficultyLevel,
    pub price_per_attempt: i64,
    pub point_per_attempt: i64,
    pub questions: Json<Vec<QuizQuestion>>,
    pub duration_seconds: i64,
    pub is_published: bool,
    pub creator_id: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating a quiz. Pricing is never client-supplied; it is derived
/// from the difficulty tier on the server.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub slug: String,
    pub difficulty: DifficultyLevel,
    pub questions: Vec<QuizQuestion>,
    #[validate(range(min = 0))]
    pub duration_seconds: i64,
    /// Client-supplied token deduplicating retried creates.
    pub idempotency_key: Option<String>,
}

/// DTO for the AI-generation endpoint. The validation rules mirror the
/// generation pipeline's accepted envelope.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateQuizRequest {
    #[validate(length(min = 2, max = 200))]
    pub subject: String,
    #[validate(length(min = 1, max = 20))]
    pub topics: Vec<String>,
    #[validate(range(min = 1, max = 10))]
    pub difficulty_level: i32,
    #[validate(range(min = 5, max = 50))]
    pub question_count: i64,
    pub idempotency_key: Option<String>,
}
