// tests/payment_tests.rs

mod common;

use common::spawn_app;
use quizmania_backend::models::quiz::DifficultyLevel;

#[tokio::test]
async fn purchase_verify_unlocks_exactly_once() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::Hard).await;
    let token = app.token_for(user_id, "user");

    // priced quiz is gated before purchase
    let response = client
        .post(format!("{}/api/quizzes/{}/start", app.address, quiz_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "fingerprint": "fp-test-device" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 402);

    let order: serde_json::Value = client
        .post(format!("{}/api/quizzes/{}/purchase", app.address, quiz_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_ref = order["order_ref"].as_str().unwrap().to_string();
    assert_eq!(order["amount"], 20);

    let verify_body = serde_json::json!({
        "order_ref": order_ref,
        "payment_ref": "pay_test_123",
    });
    let response = client
        .post(format!("{}/api/payments/verify", app.address))
        .bearer_auth(&token)
        .json(&verify_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // re-verify is an idempotent success, and still one unlock row
    let response = client
        .post(format!("{}/api/payments/verify", app.address))
        .bearer_auth(&token)
        .json(&verify_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let unlocks: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM quiz_unlocks WHERE user_id = $1 AND quiz_id = $2",
    )
    .bind(user_id)
    .bind(quiz_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(unlocks.0, 1);

    // the unlock now passes the start gate
    let response = client
        .post(format!("{}/api/quizzes/{}/start", app.address, quiz_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "fingerprint": "fp-test-device" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn webhook_redelivery_applies_effects_once() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let token = app.token_for(user_id, "user");

    let order: serde_json::Value = client
        .post(format!("{}/api/payments/subscribe", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_ref = order["order_ref"].as_str().unwrap().to_string();
    assert_eq!(order["amount"], 400);

    let event = serde_json::json!({
        "event": "payment.captured",
        "payload": {
            "payment": { "entity": { "id": "pay_test_456", "order_id": order_ref } }
        }
    });

    let response = client
        .post(format!("{}/api/webhooks/payments", app.address))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let (account_type, premium_until): (String, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as("SELECT account_type::TEXT, premium_until FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(account_type, "PREMIUM");
    let first_expiry = premium_until.expect("premium_until should be set");

    // at-least-once delivery: the same event arrives again
    let response = client
        .post(format!("{}/api/webhooks/payments", app.address))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let (_, premium_until): (String, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as("SELECT account_type::TEXT, premium_until FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    // redelivery did not extend the subscription again
    assert_eq!(premium_until.unwrap(), first_expiry);
}

#[tokio::test]
async fn failed_payment_never_unlocks() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::Hard).await;
    let token = app.token_for(user_id, "user");

    let order: serde_json::Value = client
        .post(format!("{}/api/quizzes/{}/purchase", app.address, quiz_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_ref = order["order_ref"].as_str().unwrap().to_string();

    let event = serde_json::json!({
        "event": "payment.failed",
        "payload": {
            "payment": { "entity": { "id": "pay_test_789", "order_id": order_ref } }
        }
    });
    client
        .post(format!("{}/api/webhooks/payments", app.address))
        .json(&event)
        .send()
        .await
        .unwrap();

    let unlocks: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM quiz_unlocks WHERE user_id = $1 AND quiz_id = $2",
    )
    .bind(user_id)
    .bind(quiz_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(unlocks.0, 0);

    // a failed transaction cannot be verified into a capture
    let response = client
        .post(format!("{}/api/payments/verify", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "order_ref": order["order_ref"],
            "payment_ref": "pay_test_789",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn subscribe_reuses_the_recent_pending_order() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let token = app.token_for(user_id, "user");

    let first: serde_json::Value = client
        .post(format!("{}/api/payments/subscribe", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let second: serde_json::Value = client
        .post(format!("{}/api/payments/subscribe", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["order_ref"], second["order_ref"]);

    let orders: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payment_transactions WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(orders.0, 1);
}
