//! OpenAI chat-completions client (POST /chat/completions with function calling).
//! Works against api.openai.com and any OpenAI-compatible server.

use crate::llm::{
    ChatMessage, ChatResponse, LlmBackend, LlmError, ToolCall, ToolCallFunction, ToolDefinition,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: model.to_string(),
            messages: messages_to_openai(&messages),
            tools: tools.filter(|t| !t.is_empty()),
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: OpenAiChatResponse = res.json().await?;
        openai_response_to_chat_response(data)
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    typ: String,
    function: OpenAiToolCallFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCallFunction {
    name: String,
    /// JSON-encoded arguments object.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

fn messages_to_openai(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|m| match m.role.as_str() {
            "system" => OpenAiMessage::System {
                content: m.content.clone(),
            },
            "assistant" => OpenAiMessage::Assistant {
                content: m.content.clone(),
                tool_calls: m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|c| OpenAiToolCall {
                            id: c.id.clone(),
                            typ: function_type(),
                            function: OpenAiToolCallFunction {
                                name: c.function.name.clone(),
                                arguments: serde_json::to_string(&c.function.arguments)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            },
                        })
                        .collect()
                }),
            },
            "tool" => OpenAiMessage::Tool {
                tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
                content: m.content.clone(),
            },
            _ => OpenAiMessage::User {
                content: m.content.clone(),
            },
        })
        .collect()
}

fn openai_response_to_chat_response(data: OpenAiChatResponse) -> Result<ChatResponse, LlmError> {
    let message = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .ok_or_else(|| LlmError::Api("response contained no choices".to_string()))?;
    let tool_calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| {
            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                log::debug!("openai: unparseable arguments for {}: {}", tc.function.name, e);
                serde_json::Value::Null
            });
            ToolCall {
                id: if tc.id.is_empty() {
                    format!("call_{}", i)
                } else {
                    tc.id
                },
                function: ToolCallFunction {
                    name: tc.function.name,
                    arguments,
                },
            }
        })
        .collect();
    Ok(ChatResponse {
        message: Some(ChatMessage {
            role: "assistant".to_string(),
            content: message.content.unwrap_or_default(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }),
    })
}
