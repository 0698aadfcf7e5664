//! Execution backends and the result contract they share.
//!
//! JavaScript runs in-process in [`JsSandbox`]; everything else goes to a
//! [`RemoteBackend`], normally the Piston execution service. Neither path
//! returns an error: every failure is folded into [`ExecutionResult`] so the
//! caller can render `output` unconditionally.

pub mod javascript;
pub mod piston;

pub use javascript::{JavaScriptLimits, JsSandbox};
pub use piston::PistonClient;

use async_trait::async_trait;
use serde::Serialize;

/// Placeholder shown when a run produced no output at all.
pub const NO_OUTPUT: &str = "(no output)";

/// Uniform outcome of running a piece of code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Captured output. Never empty.
    pub output: String,
    /// True if the code faulted, failed to compile, or exited nonzero.
    pub is_error: bool,
}

impl ExecutionResult {
    /// Build a result, substituting [`NO_OUTPUT`] for an empty output.
    pub fn new(output: impl Into<String>, is_error: bool) -> Self {
        let mut output = output.into();
        if output.is_empty() {
            output = NO_OUTPUT.to_string();
        }
        Self { output, is_error }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new(output, false)
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self::new(output, true)
    }
}

/// Executes code for languages that cannot run in-process.
///
/// Implementations must not fail: unsupported languages, transport problems
/// and malformed responses all resolve to an error [`ExecutionResult`].
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Run `source`, written in the user-facing `language`.
    async fn run(&self, language: &str, source: &str) -> ExecutionResult;
}
