//! REST client for the simulation API
//!
//! ## Table of Contents
//! - **ApiClient**: Datasets, scenarios, runs and stored frames
//! - **problem_from_response**: Map a non-2xx response to a server problem
//!
//! Request bodies are validated before they are sent and every response body
//! is validated before it is returned, with the same schema functions the
//! stream path uses.

use crate::config::ClientConfig;
use crate::error::{Result, TelemetryError};
use crate::resilience::{retry_transient, BackoffConfig};
use crate::schema::{
    self, Dataset, Frame, PaginatedResponse, ProblemError, Run, RunCreateRequest, Scenario,
    ScenarioCreateRequest, Validate,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Header carrying a client-chosen key that makes `POST /runs` safe to repeat
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Simulation API client
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    retry: BackoffConfig,
}

impl ApiClient {
    /// Create a client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TelemetryError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            retry: BackoffConfig::default().with_max_retries(2),
        })
    }

    /// Create a client from `EPI_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Set the retry policy for idempotent calls
    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// List datasets visible to the caller
    pub async fn list_datasets(&self, token: &str) -> Result<PaginatedResponse<Dataset>> {
        self.get_json(token, "/datasets", &[]).await
    }

    /// Create a scenario
    pub async fn create_scenario(&self, token: &str, request: &ScenarioCreateRequest) -> Result<Scenario> {
        schema::merge_results(request.validate(), request.check_npi_references())?;
        let scenario: Scenario = self.post_json(token, "/scenarios", request, None).await?;
        info!(scenario_id = %scenario.id, title = %scenario.title, "Scenario created");
        Ok(scenario)
    }

    /// List scenarios
    pub async fn list_scenarios(&self, token: &str) -> Result<PaginatedResponse<Scenario>> {
        self.get_json(token, "/scenarios", &[]).await
    }

    /// Fetch one scenario
    pub async fn get_scenario(&self, token: &str, id: Uuid) -> Result<Scenario> {
        self.get_json(token, &format!("/scenarios/{}", id), &[]).await
    }

    /// Queue a run
    ///
    /// With an idempotency key the call is retried on transient failures and
    /// the server returns the original run for a repeated key.
    pub async fn create_run(
        &self,
        token: &str,
        request: &RunCreateRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Run> {
        let run: Run = self.post_json(token, "/runs", request, idempotency_key).await?;
        info!(run_id = %run.id, scenario_id = %run.scenario_id, status = %run.status, "Run created");
        Ok(run)
    }

    /// Fetch one run
    pub async fn get_run(&self, token: &str, id: Uuid) -> Result<Run> {
        self.get_json(token, &format!("/runs/{}", id), &[]).await
    }

    /// List runs
    pub async fn list_runs(&self, token: &str) -> Result<PaginatedResponse<Run>> {
        self.get_json(token, "/runs", &[]).await
    }

    /// Page through stored frames of a run
    pub async fn list_frames(
        &self,
        token: &str,
        run_id: Uuid,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<PaginatedResponse<Frame>> {
        let mut query = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json(token, &format!("/runs/{}/frames", run_id), &query).await
    }

    async fn get_json<T>(&self, token: &str, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let token = require_token(token)?;
        let url = self.config.url(path);
        debug!(url = %url, "GET");

        retry_transient(&self.retry, || {
            let request = self.http.get(url.as_str()).bearer_auth(token).query(query);
            async move { read_body(request.send().await?).await }
        })
        .await
    }

    async fn post_json<B, T>(&self, token: &str, path: &str, body: &B, idempotency_key: Option<&str>) -> Result<T>
    where
        B: Serialize + Validate,
        T: DeserializeOwned + Validate,
    {
        let token = require_token(token)?;
        body.validate()?;
        let payload = serde_json::to_vec(body)?;
        let url = self.config.url(path);
        debug!(url = %url, idempotent = idempotency_key.is_some(), "POST");

        let send = || {
            let mut request = self
                .http
                .post(url.as_str())
                .bearer_auth(token)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone());
            if let Some(key) = idempotency_key {
                request = request.header(IDEMPOTENCY_KEY_HEADER, key);
            }
            async move { read_body(request.send().await?).await }
        };

        match idempotency_key {
            Some(_) => retry_transient(&self.retry, send).await,
            None => send().await,
        }
    }
}

fn require_token(token: &str) -> Result<&str> {
    let token = token.trim();
    if token.is_empty() {
        Err(TelemetryError::AuthRequired)
    } else {
        Ok(token)
    }
}

async fn read_body<T>(response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    if !response.status().is_success() {
        return Err(problem_from_response(response).await);
    }
    let body = response.text().await?;
    Ok(schema::parse(&body)?)
}

/// Turn a non-2xx response into [`TelemetryError::Problem`]
///
/// Bodies that are not a valid problem document are wrapped in one built from
/// the status code.
pub(crate) async fn problem_from_response(response: reqwest::Response) -> TelemetryError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return err.into(),
    };
    let problem = schema::parse::<ProblemError>(&body).unwrap_or_else(|_| ProblemError::from_status(status, &body));
    warn!(
        status,
        code = %problem.code,
        correlation_id = %problem.correlation_id,
        "Request rejected"
    );
    TelemetryError::Problem(problem)
}
