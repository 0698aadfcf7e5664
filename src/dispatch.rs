//! Execution dispatcher.
//!
//! Routes a run to the in-process JavaScript sandbox or to the remote
//! backend, based only on the language identifier.

use thiserror::Error;
use tracing::{error, info};

use crate::backend::{javascript, ExecutionResult, JavaScriptLimits, PistonClient, RemoteBackend};
use crate::language::Language;

/// Rejected because there is nothing to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Nothing to run — write some code first!")]
pub struct EmptySource;

/// A validated request to run some code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    language: String,
    source: String,
}

impl ExecutionRequest {
    /// Build a request; the source is trimmed and must not end up empty.
    pub fn new(language: impl Into<String>, source: &str) -> Result<Self, EmptySource> {
        let source = source.trim();
        if source.is_empty() {
            return Err(EmptySource);
        }
        Ok(Self {
            language: language.into(),
            source: source.to_string(),
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Runs code locally or remotely and returns a uniform result.
#[derive(Debug, Clone)]
pub struct Executor<R = PistonClient> {
    javascript: JavaScriptLimits,
    remote: R,
}

impl<R: RemoteBackend> Executor<R> {
    pub const fn new(javascript: JavaScriptLimits, remote: R) -> Self {
        Self { javascript, remote }
    }

    /// Run `source`. Never fails; faults are reported in the result.
    pub async fn execute(&self, language: &str, source: &str) -> ExecutionResult {
        info!(language = %language, code_len = source.len(), "Executing code");

        match Language::from_id(language) {
            Some(lang) if lang.is_local() => self.run_javascript(source).await,
            _ => self.remote.run(language, source).await,
        }
    }

    /// The sandbox blocks until the script finishes, so it runs off the
    /// async workers.
    async fn run_javascript(&self, source: &str) -> ExecutionResult {
        let source = source.to_owned();
        let limits = self.javascript;
        tokio::task::spawn_blocking(move || javascript::run(&source, &limits))
            .await
            .unwrap_or_else(|err| {
                error!(error = %err, "JavaScript sandbox task failed");
                ExecutionResult::error("Sandbox crashed")
            })
    }

    /// Run a validated request.
    pub async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute(request.language(), request.source()).await
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }
}
