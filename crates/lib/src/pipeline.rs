//! Mention cycle: the thread-serialized path from an `app_mention` to a posted reply.
//!
//! identity → addressed? → lock thread → fetch replies → last word? → history →
//! agent turn → last text item → post → delayed unlock.
//!
//! At most one cycle runs per thread. A mention that arrives while its thread is
//! locked (running, or inside the cooldown after a run) is dropped. The cooldown
//! absorbs Slack's redeliveries of the same event. Failures after the lock is
//! taken are logged and end the cycle without a reply; the thread is still
//! released after the cooldown.

use crate::agent::{Agent, AgentError, TurnRequest};
use crate::history::HistoryBuilder;
use crate::prompt::PromptContext;
use crate::response::extract_answer;
use crate::slack::{BotIdentity, ChatPlatform, MentionEvent, ReplyRequest, SlackError};
use crate::thread_lock::ThreadLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// How a mention cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A reply was posted to the thread.
    Replied,
    /// The text does not mention the responder, or the responder wrote it.
    NotAddressed,
    /// Another cycle for the thread is running or cooling down.
    Busy,
    /// The newest reply in the thread is the responder's own.
    LastWordIsOwn,
    /// The agent produced no text to post.
    NoAnswer,
    /// A collaborator call failed; nothing was posted.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("slack: {0}")]
    Platform(#[from] SlackError),
    #[error("agent: {0}")]
    Agent(#[from] AgentError),
}

/// Post `answer` into the thread unless it is absent or blank. Returns whether a message was sent.
/// Whitespace-only answers count as absent; Slack rejects blank message text.
pub async fn dispatch_reply(
    platform: &dyn ChatPlatform,
    channel_id: &str,
    thread_ts: &str,
    answer: Option<&str>,
) -> Result<bool, SlackError> {
    let Some(text) = answer.filter(|a| !a.trim().is_empty()) else {
        return Ok(false);
    };
    platform
        .post_reply(&ReplyRequest {
            channel_id: channel_id.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
        })
        .await?;
    Ok(true)
}

/// Answers mentions, one cycle per thread at a time.
pub struct Responder {
    platform: Arc<dyn ChatPlatform>,
    agent: Arc<dyn Agent>,
    locks: ThreadLock,
    identity: OnceCell<BotIdentity>,
}

impl Responder {
    pub fn new(platform: Arc<dyn ChatPlatform>, agent: Arc<dyn Agent>, cooldown: Duration) -> Self {
        Self {
            platform,
            agent,
            locks: ThreadLock::new(cooldown),
            identity: OnceCell::new(),
        }
    }

    /// True while a cycle for the thread is running or cooling down.
    pub fn thread_busy(&self, thread_id: &str) -> bool {
        self.locks.is_locked(thread_id)
    }

    pub fn busy_threads(&self) -> usize {
        self.locks.len()
    }

    /// The responder's identity, looked up once. A failed lookup is retried on the next call.
    pub async fn identity(&self) -> Result<&BotIdentity, SlackError> {
        self.identity
            .get_or_try_init(|| self.platform.identity())
            .await
    }

    /// Run one mention cycle. Never fails: every outcome is logged and reported.
    pub async fn handle_mention(&self, event: MentionEvent) -> CycleOutcome {
        let identity = match self.identity().await {
            Ok(id) => id.clone(),
            Err(e) => {
                log::warn!("mention: identity lookup failed: {}", e);
                return CycleOutcome::Failed;
            }
        };
        if !event.addresses(&identity.user_id) {
            log::debug!(
                "mention: {} in {} does not address {}",
                event.ts,
                event.channel_id,
                identity.user_id
            );
            return CycleOutcome::NotAddressed;
        }

        let thread_id = event.thread_id().to_string();
        let Some(guard) = self.locks.try_acquire(&thread_id) else {
            log::debug!("mention: thread {} busy, dropping {}", thread_id, event.ts);
            return CycleOutcome::Busy;
        };
        log::info!(
            "mention: cycle started for thread {} in {} (from {})",
            thread_id,
            event.channel_id,
            event.actor_id
        );

        let result = self.run_cycle(&identity, &event).await;
        drop(guard.release(self.locks.cooldown()));

        match result {
            Ok(outcome) => {
                match outcome {
                    CycleOutcome::Replied => log::info!("mention: replied in thread {}", thread_id),
                    other => log::debug!("mention: thread {} ended: {:?}", thread_id, other),
                }
                outcome
            }
            Err(e) => {
                log::warn!("mention: cycle for thread {} failed: {}", thread_id, e);
                CycleOutcome::Failed
            }
        }
    }

    async fn run_cycle(&self, identity: &BotIdentity, event: &MentionEvent) -> Result<CycleOutcome, CycleError> {
        let thread_id = event.thread_id();
        let thread = self
            .platform
            .fetch_replies(&event.channel_id, thread_id)
            .await?;

        let builder = HistoryBuilder::new(&identity.user_id);
        if builder.responder_has_last_word(&thread.replies) {
            return Ok(CycleOutcome::LastWordIsOwn);
        }

        let request = TurnRequest {
            history: builder.build_excluding_trigger(&thread.replies, &event.ts),
            input: event.text.clone(),
            context: PromptContext {
                responder_id: identity.user_id.clone(),
                responder_name: identity.display_name.clone(),
                channel_id: Some(event.channel_id.clone()),
                participants: thread.participants,
            },
        };
        let items = self.agent.converse(request).await?;

        let posted = dispatch_reply(
            self.platform.as_ref(),
            &event.channel_id,
            thread_id,
            extract_answer(&items),
        )
        .await?;
        Ok(if posted {
            CycleOutcome::Replied
        } else {
            CycleOutcome::NoAnswer
        })
    }
}
