//! Paid token solver (CapSolver `createTask` / `getTaskResult` protocol).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use super::ChallengeFamily;
use crate::config::{AcquirerConfig, SolverTimings};

/// Sent as the site key when the page did not expose one.
pub const IMPLICIT_SITE_KEY: &str = "implicit";

/// What the solver needs to produce a response token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveTask {
    pub family: ChallengeFamily,
    pub target_url: String,
    pub site_key: Option<String>,
}

/// Remote service turning a challenge into a response token.
#[async_trait]
pub trait TokenSolver: Send + Sync {
    async fn solve(&self, task: &SolveTask) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest<'a> {
    client_key: &'a str,
    task: TaskBody<'a>,
}

#[derive(Debug, Serialize)]
struct TaskBody<'a> {
    #[serde(rename = "type")]
    task_type: &'a str,
    #[serde(rename = "websiteURL")]
    website_url: &'a str,
    #[serde(rename = "websiteKey")]
    website_key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultRequest<'a> {
    client_key: &'a str,
    task_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    error_id: i64,
    error_code: Option<String>,
    error_description: Option<String>,
    task_id: Option<String>,
    status: Option<String>,
    solution: Option<Solution>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Solution {
    g_recaptcha_response: Option<String>,
    token: Option<String>,
}

impl ApiResponse {
    fn error_message(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.error_code.clone())
            .unwrap_or_else(|| format!("errorId {}", self.error_id))
    }

    fn token(self) -> Option<String> {
        self.solution
            .and_then(|s| s.g_recaptcha_response.or(s.token))
            .filter(|t| !t.is_empty())
    }
}

/// HTTP client for a CapSolver-compatible endpoint.
pub struct CapSolverClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timings: SolverTimings,
}

impl CapSolverClient {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timings: SolverTimings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timings.request_timeout)
            .build()
            .context("building solver HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timings,
        })
    }

    /// `None` when no solver credential is configured.
    pub fn from_config(config: &AcquirerConfig) -> Result<Option<Self>> {
        match &config.solver_api_key {
            Some(key) => Self::new(key.clone(), config.solver_endpoint.clone(), config.solver.clone()).map(Some),
            None => Ok(None),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<ApiResponse> {
        let url = format!("{}/{}", self.endpoint, method);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("calling {}", method))?;
        let status = response.status();
        let parsed: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("decoding {} response (HTTP {})", method, status))?;
        Ok(parsed)
    }
}

#[async_trait]
impl TokenSolver for CapSolverClient {
    async fn solve(&self, task: &SolveTask) -> Result<String> {
        let request = CreateTaskRequest {
            client_key: &self.api_key,
            task: TaskBody {
                task_type: task.family.solver_task_type(),
                website_url: &task.target_url,
                website_key: task.site_key.as_deref().unwrap_or(IMPLICIT_SITE_KEY),
            },
        };

        let created = self.post("createTask", &request).await?;
        if created.error_id != 0 {
            bail!("createTask rejected: {}", created.error_message());
        }
        // some task types are answered synchronously
        if created.status.as_deref() == Some("ready") {
            return created.token().ok_or_else(|| anyhow!("task ready without a token"));
        }
        let task_id = created
            .task_id
            .clone()
            .ok_or_else(|| anyhow!("createTask returned no taskId"))?;
        info!("💳 Solver task {} created ({})", task_id, task.family);

        for attempt in 1..=self.timings.poll_attempts {
            sleep(self.timings.poll_interval).await;

            let result = self
                .post(
                    "getTaskResult",
                    &TaskResultRequest {
                        client_key: &self.api_key,
                        task_id: &task_id,
                    },
                )
                .await?;

            if result.error_id != 0 || result.status.as_deref() == Some("failed") {
                bail!("solver task {} failed: {}", task_id, result.error_message());
            }
            if result.status.as_deref() == Some("ready") {
                info!("💳 Token received after {} polls", attempt);
                return result.token().ok_or_else(|| anyhow!("task ready without a token"));
            }
            debug!("Solver task {} still processing ({}/{})", task_id, attempt, self.timings.poll_attempts);
        }

        bail!(
            "solver task {} not ready after {} polls",
            task_id,
            self.timings.poll_attempts
        )
    }
}
