use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use reflow_core::config::ProviderConfig;
use reflow_core::error::{ReflowError, Result};
use reflow_core::graph::Node;
use reflow_core::traits::NodeExecutor;
use reflow_core::types::{ExecutionContext, Message};

use crate::retry::RetryPolicy;

/// OpenAI-compatible chat completion executor for `remote` nodes.
///
/// Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc. Node config keys
/// `name`, `role`, `api_key`, `base_url`, `temperature` and `max_tokens`
/// override the provider defaults.
pub struct ChatCompletionExecutor {
    http: Client,
    defaults: ProviderConfig,
    retry: RetryPolicy,
}

impl ChatCompletionExecutor {
    pub fn new(defaults: ProviderConfig, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(defaults.timeout_secs))
            .build()
            .map_err(|e| ReflowError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            defaults,
            retry,
        })
    }

    async fn complete(&self, settings: &RequestSettings, body: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .http
            .post(&settings.url)
            .header("Authorization", format!("Bearer {}", settings.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReflowError::Timeout(self.defaults.timeout_secs)
                } else {
                    ReflowError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(ReflowError::ProviderRequest {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ReflowError::Transport(format!("invalid response body: {}", e)))
    }
}

// Request types
#[derive(Serialize, Debug)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Per-node settings after applying overrides.
#[derive(Debug, PartialEq)]
struct RequestSettings {
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

/// Config values still holding an unresolved `${VAR}` are treated as unset.
fn resolved<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.config_str(key)
        .filter(|v| !v.is_empty() && !v.starts_with("${"))
}

fn settings_for(node: &Node, defaults: &ProviderConfig) -> Result<RequestSettings> {
    let api_key = resolved(node, "api_key")
        .map(str::to_string)
        .or_else(|| defaults.api_key.clone().filter(|k| !k.is_empty()))
        .ok_or_else(|| ReflowError::Config(format!("No API key for remote node '{}'", node.id)))?;

    let base_url = resolved(node, "base_url").unwrap_or(defaults.base_url.as_str());

    Ok(RequestSettings {
        url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        api_key,
        model: resolved(node, "name")
            .or_else(|| resolved(node, "model"))
            .unwrap_or(defaults.model.as_str())
            .to_string(),
        temperature: node
            .config
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
            .unwrap_or(defaults.temperature),
        max_tokens: node
            .config
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|t| t as u32)
            .unwrap_or(defaults.max_tokens),
    })
}

/// Render pending inputs as `[SOURCE]` blocks, preceded by the node's instructions.
fn build_context(node: &Node, inputs: &[Message]) -> String {
    let mut parts = Vec::new();

    if let Some(role) = node.config_str("role").filter(|r| !r.is_empty()) {
        parts.push(format!("[INSTRUCTIONS]\n{}\n", role));
    }

    for msg in inputs {
        let source = if msg.source.is_empty() {
            msg.role.to_string()
        } else {
            msg.source.clone()
        };
        parts.push(format!("[{}]\n{}\n", source.to_uppercase(), msg.content));
    }

    parts.join("\n")
}

fn build_request(node: &Node, settings: &RequestSettings, inputs: &[Message]) -> ChatRequest {
    ChatRequest {
        model: settings.model.clone(),
        messages: vec![
            OaiMessage {
                role: "system",
                content: node.config_str("role").unwrap_or_default().to_string(),
            },
            OaiMessage {
                role: "user",
                content: build_context(node, inputs),
            },
        ],
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

fn into_message(node: &Node, model: &str, response: ChatResponse) -> Message {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    let mut msg = Message::assistant(content, node.id.as_str())
        .with_metadata("provider", serde_json::json!("openai"))
        .with_metadata("model", serde_json::json!(model));
    if let Some(usage) = response.usage {
        msg = msg.with_metadata(
            "tokens",
            serde_json::json!({
                "prompt": usage.prompt_tokens,
                "completion": usage.completion_tokens,
            }),
        );
    }
    msg
}

/// Terminal failures become an error output instead of aborting the run.
fn failure_message(node: &Node, error: &ReflowError) -> Message {
    Message::error(
        format!("Error executing remote node: {}", error),
        node.id.as_str(),
        error.to_string(),
    )
}

impl NodeExecutor for ChatCompletionExecutor {
    fn name(&self) -> &str {
        "openai"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            let result = match settings_for(node, &self.defaults) {
                Ok(settings) => {
                    let body = build_request(node, &settings, &inputs);
                    debug!(node_id = %node.id, model = %settings.model, inputs = inputs.len(), "Calling completion endpoint");
                    self.retry
                        .run(|| self.complete(&settings, &body))
                        .await
                        .map(|response| into_message(node, &settings.model, response))
                }
                Err(e) => Err(e),
            };

            Ok(result.unwrap_or_else(|e| {
                warn!(node_id = %node.id, error = %e, "Remote node failed");
                failure_message(node, &e)
            }))
        })
    }
}
