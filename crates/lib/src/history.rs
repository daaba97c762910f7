//! Conversation history from raw thread replies.
//!
//! Each reply becomes one turn, in platform order. The responder's own messages
//! become agent turns carrying the raw text; everyone else's become human turns
//! whose content is a small JSON object (`user`, `username`, `text`) so the model
//! can tell speakers apart in a multi-party thread.

use crate::llm::ChatMessage;
use crate::slack::ThreadReply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub kind: TurnKind,
}

impl ConversationTurn {
    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            Role::Human => ChatMessage::user(self.content.clone()),
            Role::Agent => ChatMessage::assistant(self.content.clone()),
        }
    }
}

/// Encoding used for human turns.
pub fn encode_human(actor_id: &str, display_name: &str, text: &str) -> String {
    serde_json::json!({
        "user": actor_id,
        "username": display_name,
        "text": text,
    })
    .to_string()
}

/// Builds turns relative to one responder identity.
pub struct HistoryBuilder<'a> {
    responder_id: &'a str,
}

impl<'a> HistoryBuilder<'a> {
    pub fn new(responder_id: &'a str) -> Self {
        Self { responder_id }
    }

    /// True when the most recent reply was written by the responder (it already has the last word).
    pub fn responder_has_last_word(&self, replies: &[ThreadReply]) -> bool {
        replies
            .last()
            .map(|r| r.actor_id == self.responder_id)
            .unwrap_or(false)
    }

    /// Map replies to turns one-to-one, preserving order.
    pub fn build(&self, replies: &[ThreadReply]) -> Vec<ConversationTurn> {
        replies.iter().map(|r| self.turn(r)).collect()
    }

    /// History for a turn whose live input is the message at `trigger_ts`: that message
    /// is left out when it is the newest reply. If it is not (not yet indexed, or others
    /// replied since), nothing is dropped.
    pub fn build_excluding_trigger(&self, replies: &[ThreadReply], trigger_ts: &str) -> Vec<ConversationTurn> {
        let prior = match replies.split_last() {
            Some((last, rest)) if last.ts.as_deref() == Some(trigger_ts) => rest,
            _ => replies,
        };
        self.build(prior)
    }

    fn turn(&self, reply: &ThreadReply) -> ConversationTurn {
        if reply.actor_id == self.responder_id {
            ConversationTurn {
                role: Role::Agent,
                content: reply.text.clone(),
                kind: TurnKind::Text,
            }
        } else {
            ConversationTurn {
                role: Role::Human,
                content: encode_human(&reply.actor_id, &reply.display_name, &reply.text),
                kind: TurnKind::Text,
            }
        }
    }
}
