use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use hydra_common::config::{CoordinatorConfig, ModelConfig};
use hydra_common::{BigramModel, Model, Parameters};
use hydra_coordinator::{api, Coordinator, MemoryStore};
use hydra_proto::{
    paths, BalanceResponse, ErrorBody, HealthResponse, QueryResponse, RegisterResponse,
    SubmitResultResponse, TaskAssignment, TransactionsResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn small_model() -> ModelConfig {
    ModelConfig {
        vocab_size: 64,
        embed_dim: 4,
        max_seq_length: 16,
    }
}

fn app_with(config: CoordinatorConfig) -> (Router, Arc<Coordinator>) {
    let model = Arc::new(BigramModel::new(small_model()));
    let coordinator =
        Arc::new(Coordinator::new(config, model, Arc::new(MemoryStore::new())).unwrap());
    coordinator.bootstrap().unwrap();
    (api::router(Arc::clone(&coordinator), true), coordinator)
}

fn app() -> (Router, Arc<Coordinator>) {
    app_with(CoordinatorConfig {
        initial_tasks: 2,
        ..CoordinatorConfig::default()
    })
}

async fn call(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn parse<T: DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let request = Request::get(paths::HEALTH).body(Body::empty()).unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let health: HealthResponse = parse(body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.pending_tasks, 2);
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let (app, _) = app();

    let (status, body) = call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);
    let first: RegisterResponse = parse(body);
    assert!(first.created);
    assert_eq!(first.balance, 0.0);

    let (status, body) = call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);
    let second: RegisterResponse = parse(body);
    assert!(!second.created);
}

#[tokio::test]
async fn test_missing_field_is_invalid_input() {
    let (app, _) = app();

    let (status, body) = call(&app, paths::REGISTER, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "invalid_input");

    let (status, _) = call(&app, paths::SUBMIT_RESULT, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_worker_is_not_found() {
    let (app, _) = app();

    for path in [paths::GET_TASK, paths::GET_BALANCE, paths::QUERY_MODEL] {
        let (status, body) = call(&app, path, json!({ "worker_id": "ghost", "prompt": "hi" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", path);
        let error: ErrorBody = parse(body);
        assert_eq!(error.code, "unknown_worker", "{}", path);
    }
}

#[tokio::test]
async fn test_train_submit_and_query() {
    let (app, coordinator) = app();
    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;

    let (status, body) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);
    let assignment: TaskAssignment = parse(body);
    assert_eq!(assignment.data_batch.len(), 3);
    assert_eq!(assignment.reward, 1.0);

    let mut update: Parameters = assignment.parameters.clone();
    BigramModel::new(small_model())
        .train(
            &mut update,
            &assignment.data_batch,
            hydra_common::TrainOptions {
                epochs: 1,
                learning_rate: 0.05,
            },
        )
        .unwrap();

    let (status, body) = call(
        &app,
        paths::SUBMIT_RESULT,
        json!({ "worker_id": "w1", "task_id": assignment.task_id, "update": update }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let submitted: SubmitResultResponse = parse(body);
    assert_eq!(submitted.tokens_earned, 1.0);
    assert_eq!(submitted.new_balance, 1.0);
    assert_eq!(coordinator.parameters().version(), 1);

    // Second submission of the same task
    let (status, body) = call(
        &app,
        paths::SUBMIT_RESULT,
        json!({ "worker_id": "w1", "task_id": assignment.task_id, "update": update }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "invalid_task_state");

    let (status, body) = call(&app, paths::QUERY_MODEL, json!({ "worker_id": "w1", "prompt": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    let answer: QueryResponse = parse(body);
    assert_eq!(answer.new_balance, 0.5);
    assert!(answer.response.contains("hello"));

    let (status, body) = call(&app, paths::GET_BALANCE, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);
    let balance: BalanceResponse = parse(body);
    assert_eq!(balance.balance, 0.5);
    assert_eq!(balance.tasks_completed, 1);

    let (_, body) = call(&app, paths::TRANSACTIONS, json!({ "worker_id": "w1" })).await;
    let history: TransactionsResponse = parse(body);
    let kinds: Vec<&str> = history.transactions.iter().map(|t| t.kind.as_str()).collect();
    assert_eq!(kinds, vec!["reward", "query"]);
}

#[tokio::test]
async fn test_insufficient_balance_is_payment_required() {
    let (app, _) = app();
    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;

    let (status, body) = call(&app, paths::QUERY_MODEL, json!({ "worker_id": "w1", "prompt": "hi" })).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "insufficient_balance");
}

#[tokio::test]
async fn test_empty_pool_reports_no_tasks() {
    let (app, _) = app_with(CoordinatorConfig {
        initial_tasks: 1,
        ..CoordinatorConfig::default()
    });
    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;

    let (status, _) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "no_tasks_available");
}

#[tokio::test]
async fn test_incompatible_update_is_unprocessable() {
    let (app, _) = app();
    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;

    let (_, body) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    let assignment: TaskAssignment = parse(body);

    let bad = json!({ "output.bias": { "shape": [2], "data": [0.0, 0.0] } });
    let (status, body) = call(
        &app,
        paths::SUBMIT_RESULT,
        json!({ "worker_id": "w1", "task_id": assignment.task_id, "update": bad }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "incompatible_update_shape");
}

#[tokio::test]
async fn test_metrics_exposed() {
    let (app, _) = app();
    let request = Request::get(paths::METRICS).body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("coordinator_tasks_generated_total"));
}

#[tokio::test]
async fn test_default_model_update_fits_request_limit() {
    let coordinator = Arc::new(
        Coordinator::new(
            CoordinatorConfig {
                initial_tasks: 1,
                ..CoordinatorConfig::default()
            },
            Arc::new(BigramModel::new(ModelConfig::default())),
            Arc::new(MemoryStore::new()),
        )
        .unwrap(),
    );
    coordinator.bootstrap().unwrap();
    let app = api::router(Arc::clone(&coordinator), false);

    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;
    let (status, body) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    assert_eq!(status, StatusCode::OK);
    let assignment: TaskAssignment = parse(body);

    let update = BigramModel::new(ModelConfig::default())
        .with_seed(11)
        .initial_parameters();
    let request = json!({ "worker_id": "w1", "task_id": assignment.task_id, "update": update });
    assert!(request.to_string().len() > 2 * 1024 * 1024);

    let (status, body) = call(&app, paths::SUBMIT_RESULT, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let submitted: SubmitResultResponse = parse(body);
    assert_eq!(submitted.tokens_earned, 1.0);
    assert_eq!(coordinator.parameters().version(), 1);
}

#[tokio::test]
async fn test_configured_request_limit_is_enforced() {
    let (app, coordinator) = app_with(CoordinatorConfig {
        initial_tasks: 1,
        max_request_bytes: Some(256),
        ..CoordinatorConfig::default()
    });
    assert_eq!(coordinator.max_request_bytes(), 256);
    call(&app, paths::REGISTER, json!({ "worker_id": "w1" })).await;

    let (_, body) = call(&app, paths::GET_TASK, json!({ "worker_id": "w1" })).await;
    let assignment: TaskAssignment = parse(body);

    let (status, body) = call(
        &app,
        paths::SUBMIT_RESULT,
        json!({ "worker_id": "w1", "task_id": assignment.task_id, "update": assignment.parameters }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorBody = parse(body);
    assert_eq!(error.code, "invalid_input");
    assert_eq!(coordinator.parameters().version(), 0);
}

#[tokio::test]
async fn test_blank_worker_id_is_invalid_input() {
    let (app, _) = app();

    for path in [paths::GET_BALANCE, paths::TRANSACTIONS] {
        let (status, body) = call(&app, path, json!({ "worker_id": " " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
        let error: ErrorBody = parse(body);
        assert_eq!(error.code, "invalid_input", "{}", path);
    }
}
