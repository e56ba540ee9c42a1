use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use std::{sync::Arc, time::Duration};

use cinesense::{
    api::{create_router, AppState},
    broker::{MemoryChannel, Queue},
    models::{CandidateRecord, CorrelationToken, Emotion, PipelineMessage, RecommendationPayload},
    services::ResultStore,
};

struct TestApp {
    server: TestServer,
    channel: Arc<MemoryChannel>,
    results: Arc<ResultStore>,
}

fn create_test_app() -> TestApp {
    let channel = Arc::new(MemoryChannel::default());
    let results = Arc::new(ResultStore::new(Duration::from_secs(600)));
    let state = AppState::new(channel.clone(), results.clone());
    let server = TestServer::new(create_router(state)).unwrap();

    TestApp {
        server,
        channel,
        results,
    }
}

fn sample_payload(token: CorrelationToken) -> RecommendationPayload {
    RecommendationPayload {
        request_id: token,
        emotion: Some(Emotion::Sadness),
        recommendations: vec![CandidateRecord {
            title: "Inside Out".to_string(),
            genre: Some("Animation".to_string()),
            rating: Some(8.1),
            synopsis: "Riley's emotions guide her through a move.".to_string(),
            personalized_synopsis: None,
            score: 0.82,
            emotion: Emotion::Sadness,
        }],
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();
    let response = app.server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["broker"], "ready");
}

#[tokio::test]
async fn test_health_reports_broker_outage() {
    let app = create_test_app();
    app.channel.set_available(false);

    let body: serde_json::Value = app.server.get("/health").await.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["broker"], "faulted");
}

#[tokio::test]
async fn test_recommend_accepts_query() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/recommend")
        .json(&json!({ "query": "me siento muy triste" }))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "processing");

    let request_id: CorrelationToken = body["request_id"].as_str().unwrap().parse().unwrap();
    let published = app.channel.peek(Queue::Requests).await;
    assert_eq!(published.len(), 1);
    let message = PipelineMessage::decode(&published[0]).unwrap();
    assert_eq!(message.request_id, Some(request_id));
}

#[tokio::test]
async fn test_recommend_rejects_empty_query() {
    let app = create_test_app();

    for body in [json!({ "query": "   " }), json!({})] {
        let response = app.server.post("/api/recommend").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: serde_json::Value = response.json();
        assert!(error["error"].is_string());
    }
    assert_eq!(app.channel.len(Queue::Requests).await, 0);
}

#[tokio::test]
async fn test_recommend_fails_fast_without_broker() {
    let app = create_test_app();
    app.channel.set_available(false);

    let response = app
        .server
        .post("/api/recommend")
        .json(&json!({ "query": "feliz" }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unknown_result_is_pending() {
    let app = create_test_app();
    let token = CorrelationToken::new();

    let response = app.server.get(&format!("/get_result/{}", token)).await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["request_id"], token.to_string());
}

#[tokio::test]
async fn test_result_is_delivered_once() {
    let app = create_test_app();
    let token = CorrelationToken::new();
    app.results.insert(sample_payload(token)).await;

    let first: serde_json::Value = app.server.get(&format!("/get_result/{}", token)).await.json();
    assert_eq!(first["status"], "ready");
    assert_eq!(first["emotion"], "sadness");
    assert_eq!(first["recommendations"][0]["title"], "Inside Out");

    let second: serde_json::Value = app.server.get(&format!("/get_result/{}", token)).await.json();
    assert_eq!(second["status"], "pending");
}

#[tokio::test]
async fn test_results_do_not_cross_tokens() {
    let app = create_test_app();
    let mine = CorrelationToken::new();
    let theirs = CorrelationToken::new();
    app.results.insert(sample_payload(theirs)).await;

    let body: serde_json::Value = app.server.get(&format!("/get_result/{}", mine)).await.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(app.results.len().await, 1);
}

#[tokio::test]
async fn test_malformed_request_id_is_rejected() {
    let app = create_test_app();
    let response = app.server.get("/get_result/not-a-token").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
