//! HTTP API tests. Requests go straight into the router, no socket needed.

mod fixtures;
mod helpers;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use directory_dispatch::app_state::AppState;
use directory_dispatch::db::MemoryStore;
use directory_dispatch::models::job::PackageTier;
use directory_dispatch::models::outcome::Outcome;
use directory_dispatch::models::unit::ErrorCategory;
use directory_dispatch::routes;
use directory_dispatch::services::queue::JobQueueManager;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use fixtures::*;
use helpers::*;

fn app(store: Arc<MemoryStore>, queue: JobQueueManager) -> Router {
    routes::api_router(AppState::new(store, queue, None))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn payment(tier: &str) -> Value {
    json!({
        "customer_id": "cus_9001",
        "tier": tier,
        "business_profile": {
            "business_name": "Harbor Light Bakery",
            "website": "https://harborlight.example",
            "email": "hello@harborlight.example",
            "phone": "(555) 010-2200",
            "address": "12 Wharf Street",
            "city": "Portland",
            "state": "ME",
            "zip": "04101"
        }
    })
}

#[tokio::test]
async fn test_health_reports_queue_depth() {
    let (store, queue) = test_queue(directories("dir", 3), test_policy(), false);
    queue.enqueue(new_job(PackageTier::Growth)).await.unwrap();
    let app = app(store, queue);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue_depth"], 3);
    assert_eq!(body["checks"]["redis"]["status"], "disabled");
}

#[tokio::test]
async fn test_create_job_and_read_progress() {
    let (store, queue) = test_queue(directories("dir", 4), test_policy(), false);
    let app = app(store, queue.clone());

    let (status, job) = send(&app, "POST", "/api/v1/jobs", Some(payment("growth"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["tier"], "growth");
    assert_eq!(job["directory_limit"], 100);
    let job_id = job["id"].as_str().unwrap().to_string();

    let (status, jobs) = send(&app, "GET", "/api/v1/jobs?tier=growth&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    let worker = Arc::new(ScriptedWorker::new().script(
        "dir-003",
        vec![Outcome::failure(ErrorCategory::ValidationRejected, "bad zip", 10)],
    ));
    test_dispatcher(queue, worker, None, 2).drain().await.unwrap();

    let (status, summary) = send(&app, "GET", &format!("/api/v1/jobs/{}/summary", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total"], 4);
    assert_eq!(summary["succeeded"], 3);
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["percent_complete"], 100.0);
    assert_eq!(summary["status"], "partially_completed");

    let (status, customer) =
        send(&app, "GET", &format!("/api/v1/customer/jobs/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(customer["succeeded"], 3);
    assert_eq!(customer["failed"], 1);
    assert!(customer.get("skipped").is_none());
    assert!(!customer.to_string().contains("validation_rejected"));
}

#[tokio::test]
async fn test_create_job_validation_errors() {
    let (store, queue) = test_queue(directories("dir", 4), test_policy(), false);
    let app = app(store, queue);

    let mut body = payment("pro");
    body["business_profile"]["email"] = json!("not-an-email");
    let (status, error) = send(&app, "POST", "/api/v1/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["error"], "validation_failed");
    let details = error["details"].as_array().unwrap();
    assert!(details.iter().any(|d| d.as_str().unwrap().contains("email")));
    assert!(details
        .iter()
        .any(|d| d.as_str().unwrap().contains("category")));

    let mut body = payment("starter");
    body["directory_limit"] = json!(500);
    let (status, _) = send(&app, "POST", "/api/v1/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_cancel_and_retry_endpoints() {
    let (store, queue) = test_queue(directories("dir", 2), test_policy(), false);
    let job = queue.enqueue(new_job(PackageTier::Growth)).await.unwrap();
    let app = app(store.clone(), queue);

    let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/cancel", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped_units"], 2);

    let (status, summary) = send(&app, "GET", &format!("/api/v1/jobs/{}/summary", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "cancelled");
    assert_eq!(summary["skipped"], 2);

    let unit_id = {
        use directory_dispatch::db::SubmissionStore;
        store.job_units(job.id).await.unwrap()[0].id
    };
    let (status, body) = send(&app, "POST", &format!("/api/v1/units/{}/retry", unit_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("cancelled"));

    let (status, history) =
        send(&app, "GET", &format!("/api/v1/units/{}/history", unit_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (store, queue) = test_queue(directories("dir", 1), test_policy(), false);
    let app = app(store, queue);
    let missing = Uuid::new_v4();

    for (method, uri) in [
        ("GET", format!("/api/v1/jobs/{}/summary", missing)),
        ("GET", format!("/api/v1/customer/jobs/{}", missing)),
        ("POST", format!("/api/v1/jobs/{}/cancel", missing)),
        ("POST", format!("/api/v1/units/{}/retry", missing)),
        ("GET", format!("/api/v1/units/{}/history", missing)),
    ] {
        let (status, _) = send(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}
