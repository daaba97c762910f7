//! Slack integration: inbound Events API payloads and the Web API client.
//!
//! The responder only talks to Slack through the [`ChatPlatform`] trait so the
//! pipeline can run against any platform (or a test double).

mod client;
mod events;
mod platform;

pub use client::SlackClient;
pub use events::{classify, mention_token, InboundPayload, MentionEvent};
pub use platform::{
    BotIdentity, ChatPlatform, Participant, ReplyRequest, SlackError, ThreadReplies, ThreadReply,
};
