//! MCP server implementation using rmcp.
//!
//! Exposes code execution, AI challenges and the points ledger as MCP tools.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info};

use crate::ai::{Challenge, GeminiClient};
use crate::backend::RemoteBackend;
use crate::dispatch::{ExecutionRequest, Executor};
use crate::language::Language;
use crate::score::{Difficulty, PointsStore};

const AI_NOT_CONFIGURED: &str =
    "AI challenge service is not configured: set GEMINI_API_KEY to enable it";

/// MCP server for coding practice.
#[derive(Clone)]
pub struct PracticeServer<R: Clone> {
    executor: Arc<Executor<R>>,
    gemini: Option<Arc<GeminiClient>>,
    points: Arc<PointsStore>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the `run_code` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCodeParams {
    #[schemars(description = "Language identifier: javascript, python, typescript, cpp or java")]
    pub language: String,

    #[schemars(description = "Source code to run")]
    pub code: String,
}

/// Parameters for the `generate_challenge` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateChallengeParams {
    #[schemars(description = "Language the challenge should be solved in")]
    pub language: String,

    #[schemars(description = "Difficulty: easy, medium or hard")]
    pub difficulty: String,
}

/// Parameters for the `submit_solution` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubmitSolutionParams {
    #[schemars(description = "Language of the solution")]
    pub language: String,

    #[schemars(description = "Difficulty of the challenge: easy, medium or hard")]
    pub difficulty: String,

    #[schemars(description = "Challenge title")]
    pub title: String,

    #[schemars(description = "Challenge description")]
    pub description: String,

    #[schemars(description = "The submitted solution")]
    pub code: String,
}

/// Parameters for the `solve_challenge` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SolveChallengeParams {
    #[schemars(description = "Language for the reference solution")]
    pub language: String,

    #[schemars(description = "Challenge title")]
    pub title: String,

    #[schemars(description = "Challenge description")]
    pub description: String,
}

fn parse_difficulty(difficulty: &str) -> Result<Difficulty, McpError> {
    difficulty
        .parse()
        .map_err(|e: anyhow::Error| McpError::invalid_params(e.to_string(), None))
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value).map_err(|e| McpError::internal_error(e.to_string(), None))
}

fn ai_error(e: &crate::ai::AiError) -> CallToolResult {
    error!(error = %e, "AI request failed");
    CallToolResult::error(vec![Content::text(format!("AI Error: {e}"))])
}

#[tool_router]
impl<R: RemoteBackend + Clone + Send + Sync + 'static> PracticeServer<R> {
    /// Create a new practice server.
    pub fn new(executor: Executor<R>, gemini: Option<GeminiClient>, points: PointsStore) -> Self {
        Self {
            executor: Arc::new(executor),
            gemini: gemini.map(Arc::new),
            points: Arc::new(points),
            tool_router: Self::tool_router(),
        }
    }

    /// Run code and return its captured output.
    #[tool(description = "Run code (javascript locally; python, typescript, cpp, java remotely) and return its output")]
    async fn run_code(
        &self,
        Parameters(params): Parameters<RunCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = match ExecutionRequest::new(params.language, &params.code) {
            Ok(request) => request,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        };

        let result = self.executor.run(&request).await;
        if result.is_error {
            Ok(CallToolResult::error(vec![Content::text(result.output)]))
        } else {
            Ok(CallToolResult::success(vec![Content::text(result.output)]))
        }
    }

    /// Ask the AI service for a new challenge.
    #[tool(description = "Generate a coding challenge for a language and difficulty")]
    async fn generate_challenge(
        &self,
        Parameters(params): Parameters<GenerateChallengeParams>,
    ) -> Result<CallToolResult, McpError> {
        let difficulty = parse_difficulty(&params.difficulty)?;
        let Some(gemini) = self.gemini.as_deref() else {
            return Ok(CallToolResult::error(vec![Content::text(AI_NOT_CONFIGURED)]));
        };

        info!(language = %params.language, %difficulty, "Generating challenge");
        match gemini.generate_challenge(&params.language, difficulty).await {
            Ok(challenge) => Ok(CallToolResult::success(vec![Content::text(
                to_pretty_json(&challenge)?,
            )])),
            Err(e) => Ok(ai_error(&e)),
        }
    }

    /// Have the AI judge a solution; award points when it is correct.
    #[tool(description = "Submit a solution for AI evaluation; correct solutions earn points")]
    async fn submit_solution(
        &self,
        Parameters(params): Parameters<SubmitSolutionParams>,
    ) -> Result<CallToolResult, McpError> {
        let difficulty = parse_difficulty(&params.difficulty)?;
        let code = params.code.trim();
        if code.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Write some code first!",
            )]));
        }
        let Some(gemini) = self.gemini.as_deref() else {
            return Ok(CallToolResult::error(vec![Content::text(AI_NOT_CONFIGURED)]));
        };

        let challenge = Challenge {
            title: params.title,
            description: params.description,
            initial_code: String::new(),
            difficulty_label: difficulty.to_string(),
        };

        let evaluation = match gemini.evaluate(&params.language, &challenge, code).await {
            Ok(evaluation) => evaluation,
            Err(e) => return Ok(ai_error(&e)),
        };

        if !evaluation.is_correct {
            let reason = if evaluation.error_log.is_empty() {
                evaluation.feedback
            } else {
                evaluation.error_log
            };
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "✖ Incorrect — {reason}"
            ))]));
        }

        let earned = difficulty.points();
        let total = self.points.award(difficulty).map_err(|e| {
            error!(error = %e, "Failed to record points");
            McpError::internal_error(format!("Failed to record points: {e}"), None)
        })?;
        info!(earned, total, "Challenge solved");

        Ok(CallToolResult::success(vec![Content::text(format!(
            "✔ Challenge Solved!\n\n{}\n\n+{earned} points awarded. Total: {total}",
            evaluation.feedback
        ))]))
    }

    /// Hints, steps and a reference solution for a challenge.
    #[tool(description = "Get hints, steps and a commented reference solution for a challenge")]
    async fn solve_challenge(
        &self,
        Parameters(params): Parameters<SolveChallengeParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(gemini) = self.gemini.as_deref() else {
            return Ok(CallToolResult::error(vec![Content::text(AI_NOT_CONFIGURED)]));
        };

        let challenge = Challenge {
            title: params.title,
            description: params.description,
            initial_code: String::new(),
            difficulty_label: String::new(),
        };

        match gemini.solve(&params.language, &challenge).await {
            Ok(guidance) => Ok(CallToolResult::success(vec![Content::text(
                to_pretty_json(&guidance)?,
            )])),
            Err(e) => Ok(ai_error(&e)),
        }
    }

    /// Current points total.
    #[tool(description = "Show the total points earned so far")]
    async fn points(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Points: {}",
            self.points.total()
        ))]))
    }
}

#[tool_handler]
impl<R: RemoteBackend + Clone + Send + Sync + 'static> ServerHandler for PracticeServer<R> {
    fn get_info(&self) -> ServerInfo {
        let languages: Vec<_> = Language::ALL.iter().map(|l| l.id()).collect();
        let ai = if self.gemini.is_some() {
            "enabled"
        } else {
            "disabled (set GEMINI_API_KEY)"
        };

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "zcode-runner".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Coding practice: run code and work through AI-generated challenges.\n\
                 Supported languages: {languages:?}\n\
                 AI challenges: {ai}\n\
                 \n\
                 Tools:\n\
                 - run_code: language + code, returns captured output\n\
                 - generate_challenge / submit_solution / solve_challenge\n\
                 - points: current total"
            )),
        }
    }
}

/// Serve the practice server over stdio.
pub async fn serve_stdio<R: RemoteBackend + Clone + Send + Sync + 'static>(
    server: PracticeServer<R>,
) -> anyhow::Result<()> {
    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
