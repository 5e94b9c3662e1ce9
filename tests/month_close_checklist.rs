use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use school_ops::workflows::month_close::{month_close_router, MonthCloseRegistry};
use serde_json::{json, Value};
use tower::ServiceExt;

fn build_router() -> axum::Router {
    month_close_router(Arc::new(MonthCloseRegistry::default()))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn fresh_period_lists_every_step_open() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/month-close/2026-01")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let checklist = json_body(response).await;
    assert_eq!(checklist["period"], json!("2026-01"));
    assert_eq!(checklist["total_steps"], json!(6));
    assert_eq!(checklist["completed_steps"], json!(0));
    assert_eq!(checklist["closed"], json!(false));
}

#[tokio::test]
async fn completing_a_step_advances_progress() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/month-close/2026-01/steps/feed_review")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "done": true,
                        "completed_on": "2026-02-03"
                    }))
                    .expect("serialize body"),
                ))
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let checklist = json_body(response).await;
    assert_eq!(checklist["completed_steps"], json!(1));
    let step = checklist["steps"]
        .as_array()
        .expect("steps array")
        .iter()
        .find(|step| step["key"] == json!("feed_review"))
        .expect("step present")
        .clone();
    assert_eq!(step["done"], json!(true));
    assert_eq!(step["completed_on"], json!("2026-02-03"));
}

#[tokio::test]
async fn unknown_step_returns_not_found() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/month-close/2026-01/steps/close_the_books")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "done": true })).expect("serialize body"),
                ))
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
