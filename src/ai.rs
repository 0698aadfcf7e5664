//! Gemini-backed challenge service.
//!
//! Generates coding challenges, judges submissions and produces hints.
//! Every call asks the model for a JSON object and decodes it into a typed
//! reply; grading policy lives entirely on the model side.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::GeminiConfig;
use crate::score::Difficulty;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// How many times a rate-limited (429) call is retried.
const RATE_LIMIT_RETRIES: u32 = 1;

/// Errors surfaced by the challenge service.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("API Error {status}: {reason}")]
    Api { status: u16, reason: String },

    /// The service explained the failure in its error body.
    #[error("Gemini: {0}")]
    Service(String),

    #[error("Gemini returned an empty or unexpected response. Please try again.")]
    EmptyResponse,

    #[error("Gemini returned non-JSON output. Please try again.")]
    NonJson,

    #[error("Request to Gemini failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A generated coding challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub title: String,
    /// Markdown description with objectives and examples.
    pub description: String,
    #[serde(default)]
    pub initial_code: String,
    #[serde(default)]
    pub difficulty_label: String,
}

/// Verdict on a submitted solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub is_correct: bool,
    #[serde(default)]
    pub feedback: String,
    /// Console-style error for incorrect solutions, empty otherwise.
    #[serde(default)]
    pub error_log: String,
}

/// Hints, approach and a reference solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guidance {
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub solution: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 2048,
            response_mime_type: "application/json",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Google Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_delay: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::new(&config.api_key, &config.model)
            .with_base_url(&config.base_url)
            .with_retry_delay(Duration::from_millis(config.retry_delay_ms))
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Delay before retrying a rate-limited call.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Generate a challenge for `language` at `difficulty`.
    pub async fn generate_challenge(
        &self,
        language: &str,
        difficulty: Difficulty,
    ) -> Result<Challenge, AiError> {
        let prompt = format!(
            "Task: Generate a coding challenge.\n\
             Language: {language}\n\
             Difficulty: {difficulty}\n\n\
             Return a JSON object with EXACTLY these keys:\n\
             {{\n\
             \"title\": \"Short descriptive title\",\n\
             \"description\": \"Markdown description with objectives, constraints and input/output examples.\",\n\
             \"initialCode\": \"Starter code with function signatures and brief comments.\",\n\
             \"difficultyLabel\": \"{difficulty}\"\n\
             }}\n\n\
             Match the challenge to the difficulty level."
        );
        self.call(&prompt).await
    }

    /// Judge `code` as a solution to `challenge`.
    pub async fn evaluate(
        &self,
        language: &str,
        challenge: &Challenge,
        code: &str,
    ) -> Result<Evaluation, AiError> {
        let prompt = format!(
            "Task: Evaluate a user's coding solution.\n\
             Challenge Title: {title}\n\
             Challenge Description: {description}\n\
             Language: {language}\n\
             User's Code:\n\
             ```{language}\n{code}\n```\n\n\
             Return a JSON object with EXACTLY these keys:\n\
             {{\n\
             \"isCorrect\": true or false,\n\
             \"feedback\": \"A short encouraging message or a clear description of what went wrong.\",\n\
             \"errorLog\": \"If incorrect: a realistic console error message. If correct: empty string.\"\n\
             }}\n\n\
             Be strict but fair: logic that is correct but differs in style is correct.",
            title = challenge.title,
            description = challenge.description,
        );
        self.call(&prompt).await
    }

    /// Hints, steps and a commented solution for `challenge`.
    pub async fn solve(&self, language: &str, challenge: &Challenge) -> Result<Guidance, AiError> {
        let prompt = format!(
            "Task: Help a student understand and solve this coding challenge without giving the answer away up front.\n\
             Challenge: {title}\n\
             Description: {description}\n\
             Language: {language}\n\n\
             Return a JSON object with EXACTLY these keys:\n\
             {{\n\
             \"hints\": [\"hint 1\", \"hint 2\", \"hint 3\"],\n\
             \"steps\": [\"Step 1: ...\", \"Step 2: ...\", \"Step 3: ...\", \"Step 4: ...\"],\n\
             \"solution\": \"The complete, commented code solution.\"\n\
             }}\n\n\
             - hints: 3 short nudges that do not reveal the algorithm\n\
             - steps: 4-6 numbered steps explaining the approach in plain English\n\
             - solution: readable code with inline comments",
            title = challenge.title,
            description = challenge.description,
        );
        self.call(&prompt).await
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn call<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, AiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig::default(),
        };

        let mut retries = RATE_LIMIT_RETRIES;
        let response = loop {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                break response;
            }
            if status == StatusCode::TOO_MANY_REQUESTS && retries > 0 {
                retries -= 1;
                warn!(delay = ?self.retry_delay, "Rate limited by Gemini, retrying");
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }
            return Err(error_from_response(status, response).await);
        };

        let reply: GenerateResponse = response.json().await.map_err(|e| {
            debug!(error = %e, "Undecodable Gemini reply");
            AiError::EmptyResponse
        })?;

        let text = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|t| !t.is_empty())
            .ok_or(AiError::EmptyResponse)?;

        serde_json::from_str(&text).map_err(|e| {
            debug!(error = %e, "Gemini text is not the expected JSON");
            AiError::NonJson
        })
    }
}

async fn error_from_response(status: StatusCode, response: reqwest::Response) -> AiError {
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .and_then(|detail| detail.message);

    match message {
        Some(message) => AiError::Service(message),
        None => AiError::Api {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/models/test-model:generateContent";

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key", "test-model")
            .with_base_url(server.uri())
            .with_retry_delay(Duration::ZERO)
    }

    fn reply_with_text(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        }))
    }

    fn challenge() -> Challenge {
        Challenge {
            title: "Sum".to_string(),
            description: "Add two numbers".to_string(),
            initial_code: String::new(),
            difficulty_label: "easy".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_challenge_decodes_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(reply_with_text(
                r#"{"title":"FizzBuzz","description":"Print it","initialCode":"function f() {}","difficultyLabel":"easy"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let challenge = client_for(&server)
            .generate_challenge("javascript", Difficulty::Easy)
            .await
            .unwrap();
        assert_eq!(challenge.title, "FizzBuzz");
        assert_eq!(challenge.initial_code, "function f() {}");
        assert_eq!(challenge.difficulty_label, "easy");
    }

    #[tokio::test]
    async fn request_carries_prompt_and_generation_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(reply_with_text(r#"{"isCorrect":true,"feedback":"Nice"}"#))
            .mount(&server)
            .await;

        client_for(&server)
            .evaluate("python", &challenge(), "print(1 + 2)")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Challenge Title: Sum"));
        assert!(prompt.contains("print(1 + 2)"));
        assert_eq!(body["generationConfig"]["topK"], 64);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn evaluation_defaults_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply_with_text(r#"{"isCorrect":false}"#))
            .mount(&server)
            .await;

        let evaluation = client_for(&server)
            .evaluate("python", &challenge(), "pass")
            .await
            .unwrap();
        assert!(!evaluation.is_correct);
        assert!(evaluation.feedback.is_empty());
        assert!(evaluation.error_log.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(reply_with_text(
                r#"{"hints":["a"],"steps":["b"],"solution":"c"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let guidance = client_for(&server)
            .solve("java", &challenge())
            .await
            .unwrap();
        assert_eq!(guidance.hints, ["a"]);
        assert_eq!(guidance.solution, "c");
    }

    #[tokio::test]
    async fn second_rate_limit_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .solve("java", &challenge())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API Error 429: Too Many Requests");
    }

    #[tokio::test]
    async fn service_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "API key not valid" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_challenge("cpp", Difficulty::Hard)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Gemini: API key not valid");
    }

    #[tokio::test]
    async fn error_without_json_body_uses_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_challenge("cpp", Difficulty::Medium)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Api { status: 500, .. }));
        assert_eq!(err.to_string(), "API Error 500: Internal Server Error");
    }

    #[tokio::test]
    async fn missing_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_challenge("python", Difficulty::Easy)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    #[tokio::test]
    async fn non_json_text_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply_with_text("Sure! Here is your challenge:"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_challenge("python", Difficulty::Easy)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NonJson));
    }
}
