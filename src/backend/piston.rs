//! Piston execution service client.
//!
//! Submits code for every non-local language to a Piston `execute` endpoint
//! and folds the compile/run stages of its reply into an [`ExecutionResult`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{ExecutionResult, RemoteBackend};
use crate::language::{Language, LanguageBinding};

/// Public Piston instance (no authentication).
pub const DEFAULT_PISTON_URL: &str = "https://emkc.org/api/v2/piston/execute";

/// Name given to the single submitted source file.
const SOURCE_FILE_NAME: &str = "solution";

/// HTTP client for a Piston `execute` endpoint.
#[derive(Debug, Clone)]
pub struct PistonClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PistonFile<'a>>,
    stdin: &'a str,
    args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PistonFile<'a> {
    name: &'a str,
    content: &'a str,
}

/// Reply from the `execute` endpoint. Either stage may be missing.
#[derive(Debug, Default, Deserialize)]
pub struct PistonResponse {
    #[serde(default)]
    pub compile: Option<PistonStage>,
    #[serde(default)]
    pub run: Option<PistonStage>,
}

/// Output of one stage (compile or run).
#[derive(Debug, Default, Deserialize)]
pub struct PistonStage {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Exit code; `null` when the process was killed.
    pub code: Option<i64>,
    /// Signal that terminated the process, if any.
    pub signal: Option<String>,
}

impl PistonClient {
    /// Create a client for `url`, with an optional per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
            url: url.into(),
        }
    }

    /// The endpoint this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn submit(
        &self,
        binding: LanguageBinding,
        source: &str,
    ) -> Result<ExecutionResult, reqwest::Error> {
        let request = PistonRequest {
            language: binding.id,
            version: binding.runtime_version,
            files: vec![PistonFile {
                name: SOURCE_FILE_NAME,
                content: source,
            }],
            stdin: "",
            args: Vec::new(),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Execution service returned an error status");
            let output = if body.is_empty() {
                format!("Execution service error: {}", status.as_u16())
            } else {
                format!("Execution service error: {} — {body}", status.as_u16())
            };
            return Ok(ExecutionResult::error(output));
        }

        let reply: PistonResponse = response.json().await?;
        Ok(normalize(reply))
    }
}

impl Default for PistonClient {
    fn default() -> Self {
        Self::new(DEFAULT_PISTON_URL, None)
    }
}

#[async_trait]
impl RemoteBackend for PistonClient {
    #[instrument(skip(self, source), fields(url = %self.url, code_len = source.len()))]
    async fn run(&self, language: &str, source: &str) -> ExecutionResult {
        let Some(binding) = Language::from_id(language).and_then(Language::binding) else {
            debug!(language, "No remote binding for language");
            return ExecutionResult::error(format!("Execution not supported for: {language}"));
        };

        debug!(
            language = binding.id,
            version = binding.runtime_version,
            "Submitting code to execution service"
        );

        match self.submit(binding, source).await {
            Ok(result) => {
                debug!(is_error = result.is_error, "Remote execution completed");
                result
            }
            Err(err) => {
                warn!(error = %err, "Execution service request failed");
                ExecutionResult::error(format!("Network error: {err}"))
            }
        }
    }
}

/// Fold a Piston reply into an [`ExecutionResult`].
///
/// A compile stage with stderr wins outright; otherwise the run stage's
/// stdout and stderr are joined and trimmed.
pub fn normalize(response: PistonResponse) -> ExecutionResult {
    let compile = response.compile.unwrap_or_default();
    let run = response.run.unwrap_or_default();

    if let Some(stderr) = compile.stderr.as_deref().filter(|s| !s.is_empty()) {
        return ExecutionResult::error(stderr.trim());
    }

    let mut output = run.stdout.unwrap_or_default();
    if let Some(stderr) = run.stderr.as_deref().filter(|s| !s.is_empty()) {
        output.push('\n');
        output.push_str(stderr);
    }

    let is_error = match run.code {
        Some(code) => code != 0,
        None => run.signal.is_some(),
    };

    ExecutionResult::new(output.trim(), is_error)
}
