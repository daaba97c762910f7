//! Agent turn: system prompt + history + live input, then call the LLM until it stops asking for tools.
//! Every text segment and tool call is recorded as a [`ResponseItem`], in order.

use crate::config::{self, Config};
use crate::history::ConversationTurn;
use crate::llm::{ChatMessage, LlmBackend, LlmError, OpenAiClient, ToolCall, ToolDefinition};
use crate::prompt::{PromptContext, SystemPrompt};
use crate::response::ResponseItem;
use crate::tools::{ToolError, ToolRegistry};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::sync::Arc;

const MAX_TOOL_LOOP: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Everything one turn needs besides the agent's own configuration.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Prior turns, oldest first.
    pub history: Vec<ConversationTurn>,
    /// The message being answered.
    pub input: String,
    pub context: PromptContext,
}

/// Runs one conversational turn.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn converse(&self, request: TurnRequest) -> Result<Vec<ResponseItem>, AgentError>;
}

/// Agent backed by a chat model, optionally with tool bindings.
pub struct LlmAgent<B> {
    backend: B,
    model: String,
    system_prompt: SystemPrompt,
    tools: Option<Arc<ToolRegistry>>,
}

impl<B: LlmBackend> LlmAgent<B> {
    pub fn new(backend: B, model: impl Into<String>, system_prompt: SystemPrompt) -> Self {
        Self {
            backend,
            model: model.into(),
            system_prompt,
            tools: None,
        }
    }

    /// Expose the registry's operations to the model. An empty registry is the same as none.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    fn tool_definitions(&self) -> Option<Vec<ToolDefinition>> {
        self.tools.as_ref().map(|t| t.definitions())
    }

    fn initial_messages(&self, request: &TurnRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        let system = self.system_prompt.render(&request.context);
        if !system.trim().is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(request.history.iter().map(ConversationTurn::to_chat_message));
        messages.push(ChatMessage::user(request.input.clone()));
        messages
    }
}

/// Agent from config: OpenAI-compatible backend, rendered system prompt, configured tool bindings.
pub fn agent_from_config(config: &Config) -> Result<LlmAgent<OpenAiClient>, ToolError> {
    let backend = OpenAiClient::new(config::resolve_api_key(config), config.agent.base_url.clone());
    let tools = ToolRegistry::from_config(&config.tools)?;
    if !tools.is_empty() {
        log::info!("agent: tool bindings: {}", tools.binding_names().collect::<Vec<_>>().join(", "));
    }
    Ok(
        LlmAgent::new(backend, config.agent.model.clone(), SystemPrompt::from_config(config))
            .with_tools(Arc::new(tools)),
    )
}

fn tool_output_text(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn run_tool_calls(
    registry: &ToolRegistry,
    calls: &[ToolCall],
) -> Result<Vec<serde_json::Value>, ToolError> {
    try_join_all(
        calls
            .iter()
            .map(|c| registry.execute(&c.function.name, &c.function.arguments)),
    )
    .await
}

#[async_trait]
impl<B: LlmBackend> Agent for LlmAgent<B> {
    async fn converse(&self, request: TurnRequest) -> Result<Vec<ResponseItem>, AgentError> {
        let mut messages = self.initial_messages(&request);
        let tools = self.tool_definitions();
        let mut items = Vec::new();
        let mut loop_count = 0;

        log::debug!(
            "agent: model {} with {} history turn(s), {} tool(s)",
            self.model,
            request.history.len(),
            tools.as_ref().map(Vec::len).unwrap_or(0)
        );

        loop {
            let res = self
                .backend
                .chat(&self.model, messages.clone(), tools.clone())
                .await?;
            let content = res.content().to_string();
            let calls = res.tool_calls().to_vec();

            if !content.trim().is_empty() {
                items.push(ResponseItem::text(content.clone()));
            }
            if calls.is_empty() {
                break;
            }

            let Some(registry) = self.tools.as_deref() else {
                log::debug!("agent: tool_calls returned but no tools are bound");
                break;
            };

            loop_count += 1;
            if loop_count >= MAX_TOOL_LOOP {
                log::debug!("agent: max tool loop iterations reached");
                break;
            }

            let outputs = run_tool_calls(registry, &calls).await?;
            messages.push(ChatMessage {
                tool_calls: Some(calls.clone()),
                ..ChatMessage::assistant(content)
            });
            for (call, output) in calls.into_iter().zip(outputs) {
                messages.push(ChatMessage::tool_result(call.id, tool_output_text(&output)));
                items.push(ResponseItem::ToolCall {
                    tool: call.function.name,
                    arguments: call.function.arguments,
                    output,
                });
            }
        }

        Ok(items)
    }
}
