use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use school_ops::workflows::reconciliation::matching::MatchConfig;
use school_ops::workflows::reconciliation::reconciliation_router;
use school_ops::workflows::reconciliation::service::InMemoryReconciliationService;
use serde_json::{json, Value};
use tower::ServiceExt;

fn build_router_with_default(system: &str) -> axum::Router {
    let service = Arc::new(InMemoryReconciliationService::in_memory(
        MatchConfig::default(),
    ));
    reconciliation_router(service, system.to_string())
}

fn build_router() -> axum::Router {
    build_router_with_default("quickbooks")
}

fn contract_payload(id: &str, family: &str, tuition_cents: i64) -> Value {
    json!({
        "id": id,
        "family_id": family,
        "family_name": family.trim_start_matches("fam-"),
        "student_count": 2,
        "monthly_tuition": tuition_cents,
        "status": "current",
        "risk_level": "low",
        "history": [],
        "next_due_date": "2026-02-01",
        "intervention_needed": false,
        "esa_funded": true
    })
}

fn tranche_payload(id: &str, lines: Vec<Value>, total_cents: i64) -> Value {
    json!({
        "id": id,
        "provider": "ClassWallet",
        "deposit_date": "2026-01-07",
        "total_amount": total_cents,
        "payment_method": "ACH",
        "lines": lines
    })
}

fn line_payload(family: &str, amount_cents: i64) -> Value {
    json!({
        "family_id": family,
        "family_name": family.trim_start_matches("fam-"),
        "students": ["Student"],
        "amount": amount_cents,
        "period": "2026-01",
        "due_date": "2026-01-05",
        "esa_funded": true
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn tranche_lifecycle_over_http() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/contracts",
            &contract_payload("ct-1", "fam-ortiz", 116_600),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches",
            &tranche_payload("tr-1", vec![line_payload("fam-ortiz", 116_600)], 116_600),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = json_body(response).await;
    assert_eq!(payload["reconciliation_status"], json!("unmapped"));

    let response = router
        .clone()
        .oneshot(get("/api/v1/recon/tranches/tr-1/matches"))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let reports = json_body(response).await;
    let top = &reports[0]["candidates"][0];
    assert_eq!(top["contract_id"], json!("ct-1"));
    assert_eq!(top["points"], json!(100));

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches/tr-1/confirm",
            &json!({
                "family_id": "fam-ortiz",
                "contract_id": "ct-1",
                "confirmed_by": "ops@school",
                "confirmed_on": "2026-01-08"
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let deposit = json_body(response).await;
    assert_eq!(deposit["reconciliation_status"], json!("partially_mapped"));

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches/tr-1/sync",
            &json!({ "system": "quickbooks" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await;
    assert_eq!(outcome["entries_written"], json!(2));
    assert_eq!(outcome["contracts_updated"], json!(1));

    let response = router
        .clone()
        .oneshot(get("/api/v1/recon/tranches/tr-1"))
        .await
        .expect("router dispatch");
    let deposit = json_body(response).await;
    assert_eq!(deposit["reconciliation_status"], json!("fully_mapped"));
}

#[tokio::test]
async fn tranche_with_mismatched_total_is_unprocessable() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches",
            &tranche_payload("tr-1", vec![line_payload("fam-ortiz", 116_600)], 120_000),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = json_body(response).await;
    let message = payload["error"].as_str().expect("error string");
    assert!(message.contains("tr-1"));
}

#[tokio::test]
async fn sync_without_explicit_system_targets_the_configured_default() {
    let router = build_router_with_default("xero");

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/contracts",
            &contract_payload("ct-1", "fam-ortiz", 116_600),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches",
            &tranche_payload("tr-1", vec![line_payload("fam-ortiz", 116_600)], 116_600),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches/tr-1/confirm",
            &json!({
                "family_id": "fam-ortiz",
                "contract_id": "ct-1",
                "confirmed_by": "ops@school",
                "confirmed_on": "2026-01-08"
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(post("/api/v1/recon/tranches/tr-1/sync", &json!({})))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await;
    assert_eq!(outcome["system"], json!("xero"));
    assert_eq!(outcome["entries_written"], json!(2));
}

#[tokio::test]
async fn sync_against_unknown_accounting_system_is_rejected() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches",
            &tranche_payload("tr-1", vec![line_payload("fam-ortiz", 116_600)], 116_600),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches/tr-1/sync",
            &json!({ "system": "netsuite" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_tranche_returns_not_found() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(get("/api/v1/recon/tranches/tr-missing"))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn summary_reports_line_and_status_counts() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/tranches",
            &tranche_payload(
                "tr-1",
                vec![
                    line_payload("fam-ortiz", 116_600),
                    line_payload("fam-lee", 116_600),
                ],
                233_200,
            ),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(get("/api/v1/recon/summary"))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let summary = json_body(response).await;
    assert_eq!(summary["total_tranches"], json!(1));
    assert_eq!(summary["total_lines"], json!(2));
    assert_eq!(summary["confirmed_lines"], json!(0));

    let response = router
        .clone()
        .oneshot(get("/api/v1/recon/risk"))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let risk = json_body(response).await;
    assert_eq!(risk["total_contracts"], json!(0));
}

#[tokio::test]
async fn transactions_can_be_recorded_and_split() {
    let router = build_router();

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/transactions",
            &json!({
                "id": "txn-1",
                "date": "2026-01-05",
                "description": "Combined deposit",
                "amount": 150_000,
                "direction": "inbound",
                "account_ref": "operating",
                "requires_split": true
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);
    let record = json_body(response).await;
    assert_eq!(record["status"], json!("needs_split"));

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/transactions/txn-1/split",
            &json!({
                "allocations": [
                    { "beneficiary": "Ana Ortiz", "amount": 100_000 },
                    { "beneficiary": "Ben Ortiz", "amount": 50_000 }
                ]
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let record = json_body(response).await;
    assert_eq!(record["status"], json!("mapped"));

    // Short allocations must be rejected with the delta in the message.
    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/transactions",
            &json!({
                "id": "txn-2",
                "date": "2026-01-05",
                "description": "Another deposit",
                "amount": 150_000,
                "direction": "inbound",
                "account_ref": "operating",
                "requires_split": true
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/recon/transactions/txn-2/split",
            &json!({
                "allocations": [
                    { "beneficiary": "Ana Ortiz", "amount": 100_000 }
                ]
            }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
