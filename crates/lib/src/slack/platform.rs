//! The chat-platform seam used by the responder: identity, thread replies, posting.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("slack api error: {method}: {error}")]
    Api { method: &'static str, error: String },
    #[error("slack access token not configured")]
    MissingToken,
}

/// Who the responder is on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// One message in a thread, as returned by the platform (chronological order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReply {
    pub actor_id: String,
    pub display_name: String,
    pub text: String,
    pub ts: Option<String>,
}

impl ThreadReply {
    pub fn new(actor_id: impl Into<String>, display_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            display_name: display_name.into(),
            text: text.into(),
            ts: None,
        }
    }

    pub fn with_ts(mut self, ts: impl Into<String>) -> Self {
        self.ts = Some(ts.into());
        self
    }
}

/// A participant of a thread (for the system prompt roster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
}

/// Replies of a thread plus the distinct participants, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadReplies {
    pub replies: Vec<ThreadReply>,
    pub participants: Vec<Participant>,
}

impl ThreadReplies {
    /// Build from replies, deriving the participant roster from reply authors.
    pub fn from_replies(replies: Vec<ThreadReply>) -> Self {
        let mut participants: Vec<Participant> = Vec::new();
        for r in &replies {
            if !participants.iter().any(|p| p.user_id == r.actor_id) {
                participants.push(Participant {
                    user_id: r.actor_id.clone(),
                    display_name: r.display_name.clone(),
                });
            }
        }
        Self {
            replies,
            participants,
        }
    }
}

/// A message to post into a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub channel_id: String,
    pub thread_ts: String,
    pub text: String,
}

/// Chat platform operations consumed by the responder pipeline.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The responder's own user id and display name.
    async fn identity(&self) -> Result<BotIdentity, SlackError>;

    /// All replies of the thread rooted at `thread_ts`, oldest first.
    async fn fetch_replies(&self, channel_id: &str, thread_ts: &str) -> Result<ThreadReplies, SlackError>;

    async fn post_reply(&self, reply: &ReplyRequest) -> Result<(), SlackError>;
}
