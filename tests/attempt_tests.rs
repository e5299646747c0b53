// tests/attempt_tests.rs

mod common;

use common::spawn_app;
use quizmania_backend::models::quiz::DifficultyLevel;

fn correct_submission(attempt_id: i64) -> serde_json::Value {
    serde_json::json!({
        "attempt_id": attempt_id,
        "responses": [
            { "question_id": "q1", "answer": "A" },
            { "question_id": "q2", "answer": "B" },
        ],
        "summary": { "duration_seconds": 30 },
        "violations": [],
    })
}

async fn start(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    quiz_id: i64,
) -> reqwest::Response {
    client
        .post(format!("{}/api/quizzes/{}/start", address, quiz_id))
        .bearer_auth(token)
        .json(&serde_json::json!({ "fingerprint": "fp-test-device" }))
        .send()
        .await
        .expect("Failed to execute start request")
}

async fn submit(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    quiz_id: i64,
    body: &serde_json::Value,
) -> reqwest::Response {
    client
        .post(format!("{}/api/quizzes/{}/attempt", address, quiz_id))
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .expect("Failed to execute submit request")
}

#[tokio::test]
async fn start_then_submit_scores_the_attempt() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let response = start(&client, &app.address, &token, quiz_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let started: serde_json::Value = response.json().await.unwrap();
    let attempt_id = started["attempt_id"].as_i64().expect("attempt_id missing");
    assert!(started["session_id"].as_str().is_some());
    assert_eq!(started["daily_limit"], 3);
    assert_eq!(started["remaining_attempts"], 2);

    let response = submit(
        &client,
        &app.address,
        &token,
        quiz_id,
        &correct_submission(attempt_id),
    )
    .await;
    assert_eq!(response.status().as_u16(), 200);
    let result: serde_json::Value = response.json().await.unwrap();
    assert_eq!(result["score"], 2);
    assert_eq!(result["total_marks"], 2);
    assert_eq!(result["manual_review_pending"], false);
    assert_eq!(result["flagged"], false);
}

#[tokio::test]
async fn second_start_conflicts_while_in_progress() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    assert_eq!(start(&client, &app.address, &token, quiz_id).await.status(), 200);
    assert_eq!(start(&client, &app.address, &token, quiz_id).await.status(), 409);
}

#[tokio::test]
async fn concurrent_starts_create_exactly_one_attempt() {
    let Some(app) = spawn_app().await else { return };

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let address = app.address.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            let client = reqwest::Client::new();
            start(&client, &address, &token, quiz_id).await.status().as_u16()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        let status = handle.await.unwrap();
        assert!(status == 200 || status == 409, "unexpected status {}", status);
        if status == 200 {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let in_progress: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM quiz_records
        WHERE user_id = $1 AND quiz_id = $2 AND status = 'IN_PROGRESS'
        "#,
    )
    .bind(user_id)
    .bind(quiz_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(in_progress.0, 1);
}

#[tokio::test]
async fn double_submit_is_rejected_and_scores_once() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let body = correct_submission(attempt_id);
    assert_eq!(submit(&client, &app.address, &token, quiz_id, &body).await.status(), 200);
    assert_eq!(submit(&client, &app.address, &token, quiz_id, &body).await.status(), 409);

    let (score, points): (i64, i64) = sqlx::query_as(
        r#"
        SELECT r.score, u.points FROM quiz_records r
        JOIN users u ON u.id = r.user_id
        WHERE r.id = $1
        "#,
    )
    .bind(attempt_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(score, 2);
    // SUPER_EASY awards no points, so the double-submit guard is the only
    // thing keeping this at zero rather than "still zero by luck"
    assert_eq!(points, 0);
}

#[tokio::test]
async fn submit_with_idempotency_key_replays_once() {
    // Unlike the plain submit path, this one needs the shared cache.
    if std::env::var("REDIS_URL").is_err() {
        eprintln!("REDIS_URL not set; skipping idempotency test");
        return;
    }
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let mut body = correct_submission(attempt_id);
    body["idempotency_key"] = serde_json::json!(uuid::Uuid::new_v4().to_string());

    let first = submit(&client, &app.address, &token, quiz_id, &body).await;
    assert_eq!(first.status().as_u16(), 200);
    let first: serde_json::Value = first.json().await.unwrap();

    // the retry replays the committed result instead of hitting the 409 path
    let second = submit(&client, &app.address, &token, quiz_id, &body).await;
    assert_eq!(second.status().as_u16(), 200);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn fourth_start_hits_the_daily_limit() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    for _ in 0..3 {
        let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
            .await
            .json()
            .await
            .unwrap();
        let attempt_id = started["attempt_id"].as_i64().expect("start should succeed");
        let response = submit(
            &client,
            &app.address,
            &token,
            quiz_id,
            &correct_submission(attempt_id),
        )
        .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = start(&client, &app.address, &token, quiz_id).await;
    assert_eq!(response.status().as_u16(), 429);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["limit"], 3);
    assert_eq!(body["remaining"], 0);
}

#[tokio::test]
async fn premium_quiz_is_gated_for_free_users() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::Insane).await;
    let token = app.token_for(user_id, "user");

    let response = client
        .get(format!("{}/api/quizzes/{}/validate", app.address, quiz_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["can_attempt"], false);
    assert_eq!(body["requires_payment"], true);

    assert_eq!(start(&client, &app.address, &token, quiz_id).await.status(), 402);
}

#[tokio::test]
async fn lifetime_user_can_start_premium_quiz() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("LIFETIME").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::Insane).await;
    let token = app.token_for(user_id, "user");

    assert_eq!(start(&client, &app.address, &token, quiz_id).await.status(), 200);
}

#[tokio::test]
async fn unpublished_quiz_is_not_found() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    sqlx::query("UPDATE quizzes SET is_published = FALSE WHERE id = $1")
        .bind(quiz_id)
        .execute(&app.pool)
        .await
        .unwrap();
    let token = app.token_for(user_id, "user");

    assert_eq!(start(&client, &app.address, &token, quiz_id).await.status(), 404);
}

#[tokio::test]
async fn essay_questions_defer_to_manual_review() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app
        .seed_quiz_with_questions(
            DifficultyLevel::SuperEasy,
            serde_json::json!([
                { "id": "q1", "kind": "single", "correct_answer": "A", "marks": 1 },
                { "id": "q2", "kind": "essay", "correct_answer": null, "marks": 10 },
            ]),
        )
        .await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let body = serde_json::json!({
        "attempt_id": attempt_id,
        "responses": [
            { "question_id": "q1", "answer": "A" },
            { "question_id": "q2", "answer": "An essay about ownership." },
        ],
        "summary": { "duration_seconds": 120 },
    });
    let result: serde_json::Value = submit(&client, &app.address, &token, quiz_id, &body)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result["score"], 1);
    assert_eq!(result["total_marks"], 11);
    assert_eq!(result["manual_review_pending"], true);

    let queued: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM manual_review_queue WHERE quiz_record_id = $1")
            .bind(attempt_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(queued.0, 1);
}

#[tokio::test]
async fn violations_flag_the_attempt() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let mut body = correct_submission(attempt_id);
    body["violations"] = serde_json::json!([
        { "violation_type": "tab-switch", "reason": "Window lost focus twice" },
        { "violation_type": "copy-paste", "reason": "Paste detected in q2" },
    ]);

    let result: serde_json::Value = submit(&client, &app.address, &token, quiz_id, &body)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result["flagged"], true);

    let violations: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM quiz_violations WHERE quiz_record_id = $1")
            .bind(attempt_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(violations.0, 2);
}

#[tokio::test]
async fn completed_attempt_awards_points_and_rank() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    // 980 XP: one Hard quiz (50 points) crosses the Silver boundary at 1000
    sqlx::query("UPDATE users SET points = 980, xp = 980 WHERE id = $1")
        .bind(user_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let quiz_id = app.seed_quiz(DifficultyLevel::Hard).await;
    app.unlock_quiz(user_id, quiz_id).await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let result: serde_json::Value = submit(
        &client,
        &app.address,
        &token,
        quiz_id,
        &correct_submission(attempt_id),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(result["earned_points"], 50);
    assert_eq!(result["new_rank"], 1); // Silver

    let (points, xp, rank_tier): (i64, i64, i32) =
        sqlx::query_as("SELECT points, xp, rank_tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(points, 1030);
    assert_eq!(xp, 1030);
    assert_eq!(rank_tier, 1);

    let history: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM rank_history WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(history.0, 1);
}

#[tokio::test]
async fn session_expires_and_deactivates_permanently() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let user_id = app.seed_user("FREE").await;
    let quiz_id = app.seed_quiz(DifficultyLevel::SuperEasy).await;
    let token = app.token_for(user_id, "user");

    let started: serde_json::Value = start(&client, &app.address, &token, quiz_id)
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session_id"].as_str().unwrap().to_string();

    let session_url = format!(
        "{}/api/quizzes/{}/session/{}",
        app.address, quiz_id, session_id
    );

    let response = client.get(&session_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // age the session past the one-hour window
    sqlx::query("UPDATE quiz_link_sessions SET created_at = now() - INTERVAL '2 hours' WHERE id = $1::uuid")
        .bind(&session_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let response = client.get(&session_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // the expiry invalidated it for good
    let response = client.get(&session_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
