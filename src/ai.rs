use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use crate::models::{JobEvaluation, ParsedJobPosting};

// --- Chat model trait ---

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("{provider} API request failed with status {status}: {body}")]
    Status { provider: String, status: u16, body: String },
    #[error("Empty response from {provider} API")]
    EmptyResponse { provider: String },
}

/// 429, 5xx, timeouts and connection failures are worth another attempt.
pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(AiError::Status { status, .. }) = cause.downcast_ref::<AiError>() {
            return *status == 429 || *status >= 500;
        }
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            return req.is_timeout() || req.is_connect();
        }
        if cause.downcast_ref::<EvaluationError>().is_some() {
            return false;
        }
    }
    let msg = err.to_string();
    msg.contains("429") || msg.contains("500") || msg.contains("503")
}

// --- OpenAI-compatible chat completions (Mistral, Berget) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mistral,
    Berget,
}

impl ProviderKind {
    pub fn resolve(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mistral" => Ok(ProviderKind::Mistral),
            "berget" => Ok(ProviderKind::Berget),
            other => Err(anyhow!("Unknown AI provider '{}'. Available: mistral (default), berget", other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral",
            ProviderKind::Berget => "berget",
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Berget => "https://api.berget.ai/v1",
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug)]
pub struct ChatCompletionsClient {
    provider: ProviderKind,
    api_key: String,
    model_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(provider: ProviderKind, api_key: &str, model_id: &str) -> Result<Self> {
        Self::with_base_url(provider, api_key, model_id, provider.base_url())
    }

    pub fn with_base_url(provider: ProviderKind, api_key: &str, model_id: &str, base_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("API key for {} is empty", provider.name()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            provider,
            api_key: api_key.trim().to_string(),
            model_id: model_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ChatModel for ChatCompletionsClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model_id,
            messages,
            temperature: 0.0,
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {} API", self.provider.name()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                provider: self.provider.name().to_string(),
                status,
                body,
            }
            .into());
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} API response", self.provider.name()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::EmptyResponse { provider: self.provider.name().to_string() }.into())
    }

    fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Prompts ---

const SYSTEM_INSTRUCTIONS: &str = "You are an expert at matching job opportunities against a candidate profile.

The candidate's full profile is provided below. Use it to evaluate job listings.

## Instructions

You receive ONE job listing at a time. Evaluate it against the profile.

IMPORTANT:
- A fullstack role with TypeScript/React/Node.js is ALWAYS at least 3 points, unless it violates deal-breakers or blacklisted industries.
- If the role REQUIRES a tech stack the candidate explicitly marks as \"NOT my tech stack\" = automatic 1 point.
- If the role REQUIRES Python as primary language and the candidate lists it as limited = max 2 points. If Python is secondary, evaluate normally.
- Blacklisted industries listed in the profile = always 1 point.
- NEVER guess a company's industry from its name. Evaluate based on what the company actually does.
- Use the matching keywords from the profile to identify relevant roles.

Respond ONLY with JSON, nothing else.";

pub fn load_system_prompt(profile_path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(profile_path)
        .with_context(|| format!("Failed to read profile file: {}", profile_path.display()))?;
    if content.trim().is_empty() {
        return Err(anyhow!("Profile file is empty: {}", profile_path.display()));
    }
    Ok(system_prompt(&content))
}

pub fn system_prompt(profile: &str) -> String {
    format!("{}\n\n## Candidate Profile\n\n{}", SYSTEM_INSTRUCTIONS, profile)
}

pub fn build_job_prompt(job: &ParsedJobPosting) -> String {
    format!(
        "Evaluate this job listing. Respond ONLY with JSON.\n\n\
        Role: {}\n\
        Company: {}\n\
        Location: {}\n\
        Details: {}\n\n\
        Respond with:\n\
        {{\n  \"score\": 1-5,\n  \"category\": \"{}\" or \"{}\" or \"{}\",\n  \"title\": \"job title\",\n  \"company\": \"company name\",\n  \"reasoning\": \"1-2 sentences explaining the score\"\n}}\n\n\
        Scoring:\n\
        5 = Perfect match - apply immediately\n\
        4 = Strong match - worth checking out\n\
        3 = Interesting but missing something\n\
        2 = Weak match\n\
        1 = Irrelevant or wrong tech stack or blacklisted industry\n\n\
        Category:\n\
        {} = score 4-5\n\
        {} = score 3\n\
        \"\" (empty string) = score 1-2",
        job.title,
        job.company,
        job.location,
        job.details,
        CATEGORY_STRONG,
        CATEGORY_MID,
        CATEGORY_NONE,
        CATEGORY_STRONG,
        CATEGORY_MID,
    )
}

// --- Response validation ---

pub const CATEGORY_STRONG: &str = "🟢";
pub const CATEGORY_MID: &str = "🟡";
pub const CATEGORY_NONE: &str = "";

pub fn category_for_score(score: u8) -> &'static str {
    match score {
        4..=5 => CATEGORY_STRONG,
        3 => CATEGORY_MID,
        _ => CATEGORY_NONE,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation response is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("Evaluation score must be an integer, got {0}")]
    NonIntegerScore(serde_json::Value),
    #[error("Evaluation score {0} is outside 1-5")]
    ScoreOutOfRange(i64),
    #[error("Unknown evaluation category '{0}'")]
    UnknownCategory(String),
}

#[derive(Debug, Deserialize)]
struct RawReply {
    score: serde_json::Value,
    category: String,
    title: String,
    company: String,
    reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReply {
    pub score: u8,
    pub category: String,
    pub title: String,
    pub company: String,
    pub reasoning: String,
}

static FENCE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\s*").expect("valid regex"));
static FENCE_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```$").expect("valid regex"));

pub fn parse_evaluation_response(content: &str) -> Result<EvaluationReply, EvaluationError> {
    let trimmed = content.trim();
    let without_start = FENCE_START_RE.replace(trimmed, "");
    let cleaned = FENCE_END_RE.replace(&without_start, "");

    let raw: RawReply = serde_json::from_str(cleaned.trim())?;

    let score = raw
        .score
        .as_i64()
        .or_else(|| raw.score.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .ok_or_else(|| EvaluationError::NonIntegerScore(raw.score.clone()))?;
    if !(1..=5).contains(&score) {
        return Err(EvaluationError::ScoreOutOfRange(score));
    }
    let score = score as u8;

    let category = raw.category.trim();
    if ![CATEGORY_STRONG, CATEGORY_MID, CATEGORY_NONE].contains(&category) {
        return Err(EvaluationError::UnknownCategory(raw.category));
    }

    Ok(EvaluationReply {
        score,
        // The band is fixed by the score, whatever marker the model picked
        category: category_for_score(score).to_string(),
        title: raw.title,
        company: raw.company,
        reasoning: raw.reasoning,
    })
}

// --- Evaluator ---

pub struct Evaluator {
    model: Box<dyn ChatModel>,
    system_prompt: String,
}

impl Evaluator {
    pub fn new(model: Box<dyn ChatModel>, system_prompt: String) -> Self {
        Self { model, system_prompt }
    }

    pub fn provider_name(&self) -> &str {
        self.model.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn evaluate(&self, job: &ParsedJobPosting, message_id: &str) -> Result<JobEvaluation> {
        let messages = [
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(build_job_prompt(job)),
        ];

        let content = self.model.complete(&messages).await?;
        let reply = parse_evaluation_response(&content)?;

        Ok(JobEvaluation {
            message_id: message_id.to_string(),
            score: reply.score,
            category: reply.category,
            title: reply.title,
            company: reply.company,
            location: job.location.clone(),
            provider: job.provider,
            reasoning: reply.reasoning,
            links: job.links.clone(),
            evaluated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderTag;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CannedModel {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }

        fn provider_name(&self) -> &str {
            "canned"
        }

        fn model_name(&self) -> &str {
            "canned-1"
        }
    }

    fn posting() -> ParsedJobPosting {
        ParsedJobPosting::new(ProviderTag::Webbjobb, "Fullstack Dev", "Acme", "Stockholm")
            .with_details(&["React.js, Node.js"])
            .with_link("http://tracking.webbjobb.io/f/a/x")
    }

    #[test]
    fn test_parse_plain_json() {
        let reply = parse_evaluation_response(
            r#"{"score": 4, "category": "🟢", "title": "Dev", "company": "Acme", "reasoning": "Good fit."}"#,
        )
        .unwrap();
        assert_eq!(reply.score, 4);
        assert_eq!(reply.category, CATEGORY_STRONG);
        assert_eq!(reply.company, "Acme");
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"score\": 3, \"category\": \"🟡\", \"title\": \"Dev\", \"company\": \"Acme\", \"reasoning\": \"Ok.\"}\n```";
        assert_eq!(parse_evaluation_response(content).unwrap().score, 3);

        let content = "```\n{\"score\": 1, \"category\": \"\", \"title\": \"Dev\", \"company\": \"Acme\", \"reasoning\": \"No.\"}\n```";
        assert_eq!(parse_evaluation_response(content).unwrap().category, CATEGORY_NONE);
    }

    #[test]
    fn test_rejects_out_of_range_and_non_integer_scores() {
        let content = r#"{"score": 6, "category": "🟢", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::ScoreOutOfRange(6))));

        let content = r#"{"score": 0, "category": "", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::ScoreOutOfRange(0))));

        let content = r#"{"score": 3.5, "category": "🟡", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::NonIntegerScore(_))));

        let content = r#"{"score": "4", "category": "🟢", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::NonIntegerScore(_))));

        let content = r#"{"score": 4.0, "category": "🟢", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert_eq!(parse_evaluation_response(content).unwrap().score, 4);

        let content = r#"{"score": 6.0, "category": "🟢", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::ScoreOutOfRange(6))));
    }

    #[test]
    fn test_rejects_missing_fields_and_garbage() {
        let content = r#"{"score": 4, "category": "🟢", "title": "t"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::MalformedJson(_))));
        assert!(matches!(parse_evaluation_response("I think it's a 4"), Err(EvaluationError::MalformedJson(_))));
    }

    #[test]
    fn test_category_follows_score() {
        assert_eq!(category_for_score(5), CATEGORY_STRONG);
        assert_eq!(category_for_score(4), CATEGORY_STRONG);
        assert_eq!(category_for_score(3), CATEGORY_MID);
        assert_eq!(category_for_score(2), CATEGORY_NONE);
        assert_eq!(category_for_score(1), CATEGORY_NONE);

        let content = r#"{"score": 5, "category": "🟡", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert_eq!(parse_evaluation_response(content).unwrap().category, CATEGORY_STRONG);

        let content = r#"{"score": 5, "category": "green", "title": "t", "company": "c", "reasoning": "r"}"#;
        assert!(matches!(parse_evaluation_response(content), Err(EvaluationError::UnknownCategory(_))));
    }

    #[test]
    fn test_job_prompt_contains_posting() {
        let prompt = build_job_prompt(&posting());
        assert!(prompt.contains("Role: Fullstack Dev"));
        assert!(prompt.contains("Company: Acme"));
        assert!(prompt.contains("Location: Stockholm"));
        assert!(prompt.contains("Details: Fullstack Dev - Acme - Stockholm - React.js, Node.js"));
        assert!(prompt.contains("\"score\": 1-5"));
    }

    #[test]
    fn test_load_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile.md");

        std::fs::write(&profile, "  \n").unwrap();
        assert!(load_system_prompt(&profile).unwrap_err().to_string().contains("empty"));

        std::fs::write(&profile, "TypeScript, React, Node.js").unwrap();
        let prompt = load_system_prompt(&profile).unwrap();
        assert!(prompt.starts_with("You are an expert"));
        assert!(prompt.ends_with("## Candidate Profile\n\nTypeScript, React, Node.js"));

        assert!(load_system_prompt(&dir.path().join("missing.md")).is_err());
    }

    #[test]
    fn test_resolve_provider() {
        assert_eq!(ProviderKind::resolve("mistral").unwrap(), ProviderKind::Mistral);
        assert_eq!(ProviderKind::resolve("Berget").unwrap(), ProviderKind::Berget);
        assert!(ProviderKind::resolve("openai").is_err());
    }

    #[test]
    fn test_transient_classification() {
        let err: anyhow::Error = AiError::Status { provider: "mistral".into(), status: 429, body: String::new() }.into();
        assert!(is_transient(&err));
        let err: anyhow::Error = AiError::Status { provider: "mistral".into(), status: 503, body: String::new() }.into();
        assert!(is_transient(&err));
        let err: anyhow::Error = AiError::Status { provider: "mistral".into(), status: 401, body: String::new() }.into();
        assert!(!is_transient(&err));

        let err: anyhow::Error = EvaluationError::ScoreOutOfRange(9).into();
        assert!(!is_transient(&err));

        assert!(is_transient(&anyhow!("upstream said 503 Service Unavailable")));
        assert!(!is_transient(&anyhow!("invalid api key")));
    }

    #[tokio::test]
    async fn test_evaluator_builds_evaluation() {
        let model = CannedModel {
            reply: r#"{"score": 4, "category": "🟢", "title": "Fullstack Developer", "company": "Acme AB", "reasoning": "React and Node."}"#.to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let evaluator = Evaluator::new(Box::new(model), system_prompt("profile"));

        let evaluation = evaluator.evaluate(&posting(), "msg-1").await.unwrap();

        assert_eq!(evaluation.message_id, "msg-1");
        assert_eq!(evaluation.score, 4);
        assert_eq!(evaluation.title, "Fullstack Developer");
        assert_eq!(evaluation.company, "Acme AB");
        assert_eq!(evaluation.location, "Stockholm");
        assert_eq!(evaluation.provider, ProviderTag::Webbjobb);
        assert_eq!(evaluation.links, vec!["http://tracking.webbjobb.io/f/a/x"]);
        assert_eq!(evaluator.provider_name(), "canned");
    }

    #[tokio::test]
    async fn test_evaluator_reports_validation_failure() {
        let model = CannedModel { reply: "not json".to_string(), seen: Mutex::new(Vec::new()) };
        let evaluator = Evaluator::new(Box::new(model), system_prompt("profile"));

        let err = evaluator.evaluate(&posting(), "msg-1").await.unwrap_err();
        assert!(err.downcast_ref::<EvaluationError>().is_some());
        assert!(!is_transient(&err));
    }

    #[tokio::test]
    async fn test_chat_client_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"score\": 2}"}}]
            })))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::with_base_url(
            ProviderKind::Berget,
            "test-key",
            "some-model",
            &format!("{}/v1", server.uri()),
        )
        .unwrap();

        let reply = client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "{\"score\": 2}");
        assert_eq!(client.provider_name(), "berget");
        assert_eq!(client.model_name(), "some-model");
    }

    #[tokio::test]
    async fn test_chat_client_maps_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client =
            ChatCompletionsClient::with_base_url(ProviderKind::Mistral, "k", "m", &format!("{}/v1", server.uri()))
                .unwrap();

        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::Status { status: 503, .. })));
        assert!(is_transient(&err));
    }

    #[tokio::test]
    async fn test_chat_client_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client =
            ChatCompletionsClient::with_base_url(ProviderKind::Mistral, "k", "m", &server.uri()).unwrap();
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::EmptyResponse { .. })));
    }

    #[test]
    fn test_client_requires_api_key() {
        let err = ChatCompletionsClient::new(ProviderKind::Mistral, " ", "mistral-small-latest").unwrap_err();
        assert!(err.to_string().contains("mistral"));
    }
}
