//! System prompt for agent turns.
//!
//! Combines a fixed description of the responder's role with per-thread context
//! (name, channel, participants) and optional operator instructions: the
//! `systemPrompt` config value and AGENTS.md from the workspace.

use crate::config::{self, Config};
use crate::slack::Participant;
use std::fs;
use std::path::Path;

/// Load operator context from the workspace (AGENTS.md). None when missing or blank.
pub fn load_agent_ctx(workspace_dir: Option<&Path>) -> Option<String> {
    let dir = workspace_dir?;
    let path = dir.join("AGENTS.md");
    match fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Per-thread values the prompt is rendered with.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub responder_id: String,
    pub responder_name: String,
    pub channel_id: Option<String>,
    pub participants: Vec<Participant>,
}

/// System prompt factory, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct SystemPrompt {
    operator_ctx: Vec<String>,
}

impl SystemPrompt {
    pub fn new(operator_ctx: impl IntoIterator<Item = String>) -> Self {
        Self {
            operator_ctx: operator_ctx
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let workspace = config::resolve_workspace_dir(config);
        let agents_md = load_agent_ctx(workspace.as_deref());
        if agents_md.is_some() {
            log::info!("prompt: loaded AGENTS.md from workspace");
        }
        Self::new(config.agent.system_prompt.clone().into_iter().chain(agents_md))
    }

    pub fn render(&self, ctx: &PromptContext) -> String {
        let mut out = String::new();
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        out.push_str(&format!(
            "You are {}, an assistant that answers in Slack threads where you are mentioned (your user id is {}, written <@{}> in messages).\n",
            ctx.responder_name, ctx.responder_id, ctx.responder_id
        ));
        out.push_str("Today's date: ");
        out.push_str(&today);
        out.push('\n');
        if let Some(ref channel) = ctx.channel_id {
            out.push_str(&format!("Channel: {}\n", channel));
        }
        out.push_str(
            "\nEarlier messages from other people are given as JSON objects with the author's \
             user id (\"user\"), display name (\"username\") and message (\"text\"). \
             Your own earlier replies are given as plain text. Reply with plain text only, \
             addressed to the latest message.\n",
        );
        let others: Vec<&Participant> = ctx
            .participants
            .iter()
            .filter(|p| p.user_id != ctx.responder_id)
            .collect();
        if !others.is_empty() {
            out.push_str("\nParticipants in this thread:\n");
            for p in others {
                out.push_str(&format!("- {} (<@{}>)\n", p.display_name, p.user_id));
            }
        }
        for extra in &self.operator_ctx {
            out.push('\n');
            out.push_str(extra);
            out.push('\n');
        }
        out
    }
}
