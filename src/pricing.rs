// src/pricing.rs

use chrono::{DateTime, Utc};

use crate::models::{quiz::DifficultyLevel, quota::QuotaKind, user::AccountType};

/// Per-tier attempt pricing. Pure data; the mapping is total over every
/// difficulty value, so lookups can never fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingConfig {
    pub price_per_attempt: i64,
    pub point_per_attempt: i64,
    pub requires_premium: bool,
}

const fn cfg(price: i64, points: i64, premium: bool) -> PricingConfig {
    PricingConfig {
        price_per_attempt: price,
        point_per_attempt: points,
        requires_premium: premium,
    }
}

/// Pricing for a difficulty tier.
pub fn pricing_for(difficulty: DifficultyLevel) -> PricingConfig {
    match difficulty {
        // Always free
        DifficultyLevel::SuperEasy => cfg(0, 0, false),

        // Standard tiers
        DifficultyLevel::Easy => cfg(5, 10, false),
        DifficultyLevel::Normal => cfg(10, 15, false),
        DifficultyLevel::Medium => cfg(10, 15, false),
        DifficultyLevel::Hard => cfg(20, 50, false),
        DifficultyLevel::Impossible => cfg(50, 70, false),

        // Premium-only tiers
        DifficultyLevel::Insane => cfg(20, 400, true),
        DifficultyLevel::JeeMain => cfg(30, 600, true),
        DifficultyLevel::JeeAdvanced => cfg(50, 800, true),
        DifficultyLevel::NeetUg => cfg(40, 700, true),
        DifficultyLevel::UpscCse => cfg(70, 1000, true),
        DifficultyLevel::Gate => cfg(50, 850, true),
        DifficultyLevel::Cat => cfg(60, 750, true),
        DifficultyLevel::Clat => cfg(40, 600, true),
        DifficultyLevel::Ca => cfg(30, 500, true),
        DifficultyLevel::Gaokao => cfg(80, 1100, true),
        DifficultyLevel::Gre => cfg(60, 800, true),
        DifficultyLevel::Gmat => cfg(65, 900, true),
        DifficultyLevel::Usmle => cfg(75, 950, true),
        DifficultyLevel::Lnat => cfg(50, 800, true),
        DifficultyLevel::Mcat => cfg(70, 900, true),
        DifficultyLevel::Cfa => cfg(60, 1000, true),
        DifficultyLevel::GodLevel => cfg(100, 2000, true),
    }
}

/// Daily limit for an (account tier, quota kind) pair. Admin actions use a
/// flat limit independent of tier.
pub fn daily_limit_for(account_type: AccountType, kind: QuotaKind) -> i64 {
    match kind {
        QuotaKind::QuizAttempt => match account_type {
            AccountType::Free => 3,
            AccountType::Premium | AccountType::Lifetime => 10,
        },
        QuotaKind::AiGeneration => match account_type {
            AccountType::Free => 3,
            AccountType::Premium => 10,
            AccountType::Lifetime => 20,
        },
        QuotaKind::AdminAction => 30,
    }
}

/// Points earned for a graded attempt:
/// floor(score / total * point_per_attempt). A zero or negative total marks
/// value yields zero rather than dividing by it.
pub fn earned_points(score: i64, total_marks: i64, point_per_attempt: i64) -> i64 {
    if total_marks <= 0 || score <= 0 {
        return 0;
    }
    score.min(total_marks) * point_per_attempt / total_marks
}

/// Whether the account currently covers premium-gated quizzes.
/// LIFETIME always does; PREMIUM only while the expiry is in the future.
pub fn can_access_premium(
    account_type: AccountType,
    premium_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match account_type {
        AccountType::Lifetime => true,
        AccountType::Premium => premium_until.is_some_and(|until| until > now),
        AccountType::Free => false,
    }
}
