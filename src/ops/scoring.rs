//! AI lead scoring and next-action suggestions.
//!
//! The gateway speaks the OpenAI chat-completions protocol. Replies are
//! parsed leniently: the first JSON object found in the message text wins.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::AiConfig;
use crate::db::{LeadRecord, SuggestionKind};
use crate::error::ScoringError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadScore {
    pub score: i32,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestionDraft {
    pub kind: SuggestionKind,
    pub content: String,
}

#[async_trait]
pub trait LeadScorer: Send + Sync {
    async fn score_lead(&self, lead: &LeadRecord) -> Result<LeadScore, ScoringError>;
    async fn suggest_actions(
        &self,
        lead: &LeadRecord,
    ) -> Result<Vec<SuggestionDraft>, ScoringError>;
}

/// Chat-completions client for the AI gateway.
pub struct GatewayScorer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl GatewayScorer {
    pub fn new(config: &AiConfig) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", config.gateway_url),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, ScoringError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatCompletion = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ScoringError::Parse("reply has no message content".to_string()))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

const SCORE_PROMPT: &str = "You qualify sales leads for a small digital agency. \
Reply with a single JSON object {\"score\": <integer 0-100>, \"reasoning\": <one short paragraph>}.";

const SUGGEST_PROMPT: &str = "You plan next steps for sales leads at a small digital agency. \
Reply with a single JSON object {\"suggestions\": [{\"kind\": \"follow_up\"|\"call\"|\"email\"|\"proposal\", \"content\": <one sentence>}]} \
with at most three suggestions.";

fn describe_lead(lead: &LeadRecord) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "unknown".to_string());
    format!(
        "Name: {}\nCompany: {}\nEmail: {}\nSource: {}\nPipeline status: {}\nNotes: {}",
        lead.name,
        field(&lead.company),
        field(&lead.email),
        field(&lead.source),
        lead.status.as_str(),
        field(&lead.notes),
    )
}

#[async_trait]
impl LeadScorer for GatewayScorer {
    async fn score_lead(&self, lead: &LeadRecord) -> Result<LeadScore, ScoringError> {
        let reply = self.complete(SCORE_PROMPT, describe_lead(lead)).await?;
        parse_score(&reply)
    }

    async fn suggest_actions(
        &self,
        lead: &LeadRecord,
    ) -> Result<Vec<SuggestionDraft>, ScoringError> {
        let reply = self.complete(SUGGEST_PROMPT, describe_lead(lead)).await?;
        parse_suggestions(&reply)
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Find the first balanced `{...}` in `text`, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn reply_object(reply: &str) -> Result<Value, ScoringError> {
    let raw = extract_json_object(reply)
        .ok_or_else(|| ScoringError::Parse("no JSON object in reply".to_string()))?;
    serde_json::from_str(raw).map_err(|e| ScoringError::Parse(e.to_string()))
}

/// Scores may arrive as numbers or numeric strings and are clamped to 0..=100.
pub fn parse_score(reply: &str) -> Result<LeadScore, ScoringError> {
    let value = reply_object(reply)?;
    let score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
    .ok_or_else(|| ScoringError::Parse("missing numeric score".to_string()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    Ok(LeadScore {
        score: score.round().clamp(0.0, 100.0) as i32,
        reasoning,
    })
}

/// Entries with an unknown kind or empty content are skipped.
pub fn parse_suggestions(reply: &str) -> Result<Vec<SuggestionDraft>, ScoringError> {
    let value = reply_object(reply)?;
    let entries = value
        .get("suggestions")
        .and_then(Value::as_array)
        .ok_or_else(|| ScoringError::Parse("missing suggestions array".to_string()))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let kind = SuggestionKind::from_db_value(entry.get("kind")?.as_str()?)?;
            let content = entry.get("content")?.as_str()?.trim();
            (!content.is_empty()).then(|| SuggestionDraft {
                kind,
                content: content.to_string(),
            })
        })
        .collect())
}
