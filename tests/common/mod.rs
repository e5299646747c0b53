// tests/common/mod.rs

use quizmania_backend::{
    config::Config, models::quiz::DifficultyLevel, pricing, routes, state::AppState,
    stores::idempotency::RedisIdempotencyCache, utils::jwt::sign_jwt,
};
use sqlx::{PgPool, postgres::PgPoolOptions};

pub const TEST_JWT_SECRET: &str = "test_secret_for_integration_tests";

pub struct TestApp {
    pub address: String,
    pub pool: PgPool,
}

impl TestApp {
    /// Bearer token for a seeded user, signed with the test secret.
    pub fn token_for(&self, user_id: i64, role: &str) -> String {
        sign_jwt(user_id, role, TEST_JWT_SECRET, 600).expect("Failed to sign test token")
    }

    pub async fn seed_user(&self, account_type: &str) -> i64 {
        let name = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8]);
        sqlx::query_scalar(
            "INSERT INTO users (name, account_type) VALUES ($1, $2::account_type) RETURNING id",
        )
        .bind(name)
        .bind(account_type)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to seed user")
    }

    pub async fn seed_admin(&self) -> i64 {
        let name = format!("a_{}", &uuid::Uuid::new_v4().to_string()[..8]);
        sqlx::query_scalar(
            "INSERT INTO users (name, role, account_type) VALUES ($1, 'admin', 'FREE') RETURNING id",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to seed admin")
    }

    /// Seeds a published quiz with two auto-gradable questions ('A' and 'B'
    /// are the correct answers, one mark each).
    pub async fn seed_quiz(&self, difficulty: DifficultyLevel) -> i64 {
        self.seed_quiz_with_questions(
            difficulty,
            serde_json::json!([
                { "id": "q1", "kind": "single", "correct_answer": "A", "marks": 1 },
                { "id": "q2", "kind": "single", "correct_answer": "B", "marks": 1 },
            ]),
        )
        .await
    }

    pub async fn seed_quiz_with_questions(
        &self,
        difficulty: DifficultyLevel,
        questions: serde_json::Value,
    ) -> i64 {
        let cfg = pricing::pricing_for(difficulty);
        let slug = format!("quiz-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        sqlx::query_scalar(
            r#"
            INSERT INTO quizzes
            (slug, title, difficulty, price_per_attempt, point_per_attempt, questions, is_published)
            VALUES ($1, 'Test quiz', $2, $3, $4, $5, TRUE)
            RETURNING id
            "#,
        )
        .bind(&slug)
        .bind(difficulty)
        .bind(cfg.price_per_attempt)
        .bind(cfg.point_per_attempt)
        .bind(questions)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to seed quiz")
    }

    pub async fn unlock_quiz(&self, user_id: i64, quiz_id: i64) {
        sqlx::query(
            "INSERT INTO quiz_unlocks (user_id, quiz_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(quiz_id)
        .execute(&self.pool)
        .await
        .expect("Failed to unlock quiz");
    }
}

/// Spawns the app on a random port. Returns None (skipping the test) when
/// the backing services are not configured in the environment.
pub async fn spawn_app() -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping integration test");
        return None;
    };
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        redis_url: redis_url.clone(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
    };

    let redis_client = redis::Client::open(redis_url).expect("Invalid REDIS_URL");
    let state = AppState {
        pool: pool.clone(),
        idempotency: RedisIdempotencyCache::new(redis_client),
        config,
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp { address, pool })
}
