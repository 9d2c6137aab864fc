//! HTTP client for the coordinator API

use hydra_common::config::TimeoutConfig;
use hydra_common::{HydraError, Parameters, Result};
use hydra_proto::{
    paths, BalanceResponse, ErrorBody, HealthResponse, QueryRequest, QueryResponse,
    RegisterResponse, SubmitResultRequest, SubmitResultResponse, TaskAssignment,
    TransactionsResponse, WorkerRequest,
};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Coordinator client with per-call timeouts
#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: TimeoutConfig,
}

impl CoordinatorClient {
    /// Create a client for the coordinator at `base_url`
    pub fn new(base_url: impl Into<String>, timeouts: TimeoutConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| HydraError::connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeouts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(self.url(paths::HEALTH))
            .timeout(Duration::from_secs(self.timeouts.register_secs))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    pub async fn register(&self, worker_id: &str) -> Result<RegisterResponse> {
        self.post(
            paths::REGISTER,
            &worker_request(worker_id),
            self.timeouts.register_secs,
        )
        .await
    }

    /// Fetch a task; `None` when the coordinator has nothing pending
    pub async fn get_task(&self, worker_id: &str) -> Result<Option<TaskAssignment>> {
        match self
            .post(paths::GET_TASK, &worker_request(worker_id), self.timeouts.fetch_secs)
            .await
        {
            Ok(task) => Ok(Some(task)),
            Err(HydraError::NoTasksAvailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn submit_result(
        &self,
        worker_id: &str,
        task_id: &str,
        update: Parameters,
    ) -> Result<SubmitResultResponse> {
        let request = SubmitResultRequest {
            worker_id: worker_id.to_string(),
            task_id: task_id.to_string(),
            update,
        };
        self.post(paths::SUBMIT_RESULT, &request, self.timeouts.submit_secs)
            .await
    }

    pub async fn balance(&self, worker_id: &str) -> Result<BalanceResponse> {
        self.post(
            paths::GET_BALANCE,
            &worker_request(worker_id),
            self.timeouts.register_secs,
        )
        .await
    }

    /// Spend tokens on a model query
    pub async fn query(&self, worker_id: &str, prompt: &str) -> Result<QueryResponse> {
        let request = QueryRequest {
            worker_id: worker_id.to_string(),
            prompt: prompt.to_string(),
        };
        self.post(paths::QUERY_MODEL, &request, self.timeouts.fetch_secs)
            .await
    }

    pub async fn transactions(&self, worker_id: &str) -> Result<TransactionsResponse> {
        self.post(
            paths::TRANSACTIONS,
            &worker_request(worker_id),
            self.timeouts.register_secs,
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B, timeout_secs: u64) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!("POST {}", path);
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn worker_request(worker_id: &str) -> WorkerRequest {
    WorkerRequest {
        worker_id: worker_id.to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> HydraError {
    if err.is_timeout() {
        HydraError::timeout(err.to_string())
    } else {
        HydraError::connection(err.to_string())
    }
}

/// Decode a success body, or rebuild the coordinator's error from its `ErrorBody`
async fn decode<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<R>()
            .await
            .map_err(|e| HydraError::Parse(format!("Malformed response: {}", e)));
    }

    match response.json::<ErrorBody>().await {
        Ok(body) => Err(HydraError::from_code(&body.code, body.message)),
        Err(_) => Err(HydraError::connection(format!(
            "Coordinator returned {}",
            status
        ))),
    }
}
