// src/models/payment.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Captured,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    PremiumSubscription,
    QuizPurchase,
}

/// Represents the 'payment_transactions' table. Status only ever moves
/// PENDING -> CAPTURED or PENDING -> FAILED, and every downstream effect is
/// gated on that transition actually happening.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentTransaction {
    pub id: i64,
    pub user_id: i64,
    pub order_ref: String,
    pub payment_ref: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub tx_type: TransactionType,
    pub quiz_id: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A persisted grant of access to a priced quiz. Only ever created via
/// upsert keyed on (user_id, quiz_id).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizUnlock {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub unlocked_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_ref: String,
    pub amount: i64,
    pub currency: String,
}

/// DTO for the explicit verify call. Signature verification happened at the
/// gateway integration layer before this reaches us.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub order_ref: String,
    #[validate(length(min = 1))]
    pub payment_ref: String,
}

/// Gateway webhook envelope, already signature-checked upstream.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<WebhookEntity<PaymentEntity>>,
    pub order: Option<WebhookEntity<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntity<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderEntity {
    pub id: String,
}
