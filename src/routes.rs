// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, ai_quiz, attempt, payment, quiz},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (quizzes, ai-quiz, payments, webhooks, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, idempotency cache, config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let quiz_routes = Router::new()
        .route("/", post(quiz::create_quiz))
        .route("/{quiz}/publish", post(quiz::publish_quiz))
        .route("/{quiz}/start", post(attempt::start_attempt))
        .route("/{quiz}/validate", get(attempt::validate_attempt))
        .route("/{quiz}/attempt", post(attempt::submit_attempt))
        .route("/{quiz}/purchase", post(payment::purchase_quiz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Shareable-link session validation is deliberately unauthenticated;
        // the session record itself is the credential.
        .merge(Router::new().route(
            "/{quiz}/session/{session_id}",
            get(attempt::validate_session),
        ));

    let ai_quiz_routes = Router::new()
        .route("/quota", get(ai_quiz::quota_status))
        .route("/generate", post(ai_quiz::generate_quiz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let payment_routes = Router::new()
        .route("/subscribe", post(payment::subscribe))
        .route("/verify", post(payment::verify_payment))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Gateway callbacks carry no user token; the integration layer verified
    // the event signature before it reaches us.
    let webhook_routes = Router::new().route("/payments", post(payment::payment_webhook));

    let admin_routes = Router::new()
        .route("/review/{item_id}", post(admin::review_item))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/ai-quiz", ai_quiz_routes)
        .nest("/api/payments", payment_routes)
        .nest("/api/webhooks", webhook_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
