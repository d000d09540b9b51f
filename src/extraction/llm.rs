//! LLM-backed extraction over the OpenAI chat-completions API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::entity::{EntityCandidate, EntityKind};
use super::provider::{
    ActionCandidate, DecisionCandidate, ExtractionInput, ExtractionProvider, ExtractionResponse,
};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::integrations::openai::{ChatMessage, OpenAIClient};
use crate::prompts::Prompt;

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    decisions: Vec<RawDecision>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    description: String,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(alias = "description")]
    task: String,
    #[serde(default)]
    owner: Option<String>,
}

/// Strip a Markdown code fence around a JSON reply, if present.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a provider reply into candidates.
pub fn parse_reply(reply: &str) -> Result<ExtractionResponse> {
    let body = strip_code_fence(reply);
    let raw: RawResponse = serde_json::from_str(body).or_else(|first_err| {
        // Some models wrap the object in prose; retry on the outermost braces.
        match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
                .map_err(|e| Error::ExtractionFailure(format!("Invalid extraction JSON: {}", e))),
            _ => Err(Error::ExtractionFailure(format!(
                "Invalid extraction JSON: {}",
                first_err
            ))),
        }
    })?;

    Ok(ExtractionResponse {
        entities: raw
            .entities
            .into_iter()
            .filter(|e| !e.name.trim().is_empty())
            .map(|e| EntityCandidate::new(e.name.trim(), EntityKind::from_loose(&e.kind, &e.properties)))
            .collect(),
        decisions: raw
            .decisions
            .into_iter()
            .map(|d| DecisionCandidate {
                description: d.description,
                rationale: d.rationale,
            })
            .collect(),
        actions: raw
            .actions
            .into_iter()
            .map(|a| ActionCandidate {
                task: a.task,
                owner: a.owner,
            })
            .collect(),
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct OpenAiExtractionProvider {
    client: OpenAIClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_input_chars: usize,
    system_prompt: String,
}

impl OpenAiExtractionProvider {
    pub fn new(client: OpenAIClient, config: &ExtractionConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_input_chars: config.max_input_chars,
            system_prompt: Prompt::EntityExtraction.load_or_builtin(),
        }
    }

    pub fn from_env(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self::new(OpenAIClient::from_env()?, config))
    }
}

#[async_trait]
impl ExtractionProvider for OpenAiExtractionProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionResponse> {
        let text = truncate_chars(input.text, self.max_input_chars);
        debug!(
            source_id = input.source_id,
            chars = text.chars().count(),
            model = %self.model,
            "Requesting LLM extraction"
        );

        let reply = self
            .client
            .chat_completion_json(
                vec![
                    ChatMessage::system(self.system_prompt.clone()),
                    ChatMessage::user(text),
                ],
                &self.model,
                self.temperature,
                self.max_tokens,
            )
            .await?;

        parse_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_reply_and_maps_types() {
        let reply = r#"```json
{
  "entities": [
    {"name": "Germany", "type": "Country", "properties": {"status": "deprioritised"}},
    {"name": "Anna Weber", "type": "Person", "properties": {"role": "Chair"}},
    {"name": "Tariffs", "type": "Concept"},
    {"name": "  ", "type": "Topic"}
  ],
  "decisions": [{"description": "Deprioritise Germany", "rationale": "Low demand"}],
  "actions": [{"description": "Send memo", "owner": "Luis"}]
}
```"#;
        let response = parse_reply(reply).unwrap();
        assert_eq!(response.entities.len(), 3);
        assert_eq!(
            response.entities[0].kind,
            EntityKind::Country {
                status: Some("deprioritised".into())
            }
        );
        assert_eq!(response.entities[2].kind, EntityKind::topic());
        assert_eq!(response.decisions[0].rationale.as_deref(), Some("Low demand"));
        assert_eq!(response.actions[0].task, "Send memo");
        assert_eq!(response.actions[0].owner.as_deref(), Some("Luis"));
    }

    #[test]
    fn parses_reply_wrapped_in_prose() {
        let reply = "Here you go: {\"entities\": [{\"name\": \"Chile\", \"type\": \"Country\"}]} Thanks!";
        let response = parse_reply(reply).unwrap();
        assert_eq!(response.entities[0].name, "Chile");
        assert!(response.decisions.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_reply("no json here").unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn provider_calls_chat_completions() {
        let server = MockServer::start_async().await;
        let content = json!({
            "entities": [{"name": "Mercosur", "type": "Organization", "properties": {"type": "trade bloc"}}],
            "decisions": [],
            "actions": []
        })
        .to_string();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [ { "message": { "role": "assistant", "content": content } } ]
            }));
        });

        let client = OpenAIClient::new("k").unwrap().with_base_url(server.base_url());
        let provider = OpenAiExtractionProvider::new(client, &ExtractionConfig::default());
        let response = provider
            .extract(ExtractionInput {
                source_id: "s",
                text: "Mercosur talks",
                chunks: &[],
            })
            .await
            .unwrap();

        mock.assert_calls(1);
        assert_eq!(
            response.entities[0].kind,
            EntityKind::Organization {
                org_type: Some("trade bloc".into())
            }
        );
    }
}
