//! Inbound Events API payloads, narrowed once at the HTTP boundary.
//!
//! Anything that is not a URL verification or a well-formed `app_mention` is
//! [`InboundPayload::Ignored`]; classification never fails.

use serde::Deserialize;

/// The three outcomes of classifying an inbound request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// Slack URL verification; the challenge is echoed back verbatim.
    Verification { challenge: String },
    Mention(MentionEvent),
    Ignored,
}

/// An `app_mention` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvent {
    /// Slack user id of the author (e.g. "U08HJJE9U82").
    pub actor_id: String,
    /// Timestamp of the mentioning message.
    pub ts: String,
    /// Root timestamp of the thread the message belongs to, if any.
    pub thread_ts: Option<String>,
    pub text: String,
    pub channel_id: String,
    pub team_id: Option<String>,
}

impl MentionEvent {
    /// Thread identifier: the thread root, or the message itself when it is a root message.
    pub fn thread_id(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// True if the text contains an explicit `<@user_id>` mention.
    pub fn mentions(&self, user_id: &str) -> bool {
        self.text.contains(&mention_token(user_id))
    }

    /// Whether the responder with this user id should answer: it is mentioned and did not write the message.
    pub fn addresses(&self, user_id: &str) -> bool {
        self.mentions(user_id) && self.actor_id != user_id
    }
}

/// Slack's inline mention markup for a user id.
pub fn mention_token(user_id: &str) -> String {
    format!("<@{}>", user_id)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: RawEvent,
    },
    /// Flattened shape where the envelope is tagged with the event type itself.
    AppMention {
        event: RawEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type", default)]
    kind: String,
    user: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    team: Option<String>,
}

impl RawEvent {
    fn into_mention(self) -> Option<MentionEvent> {
        if self.kind != "app_mention" {
            return None;
        }
        Some(MentionEvent {
            actor_id: non_empty(self.user)?,
            ts: non_empty(self.ts)?,
            thread_ts: non_empty(self.thread_ts),
            text: self.text?,
            channel_id: non_empty(self.channel)?,
            team_id: non_empty(self.team),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Classify a raw request body.
pub fn classify(body: &[u8]) -> InboundPayload {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("events: ignoring unparseable payload: {}", e);
            return InboundPayload::Ignored;
        }
    };
    match envelope {
        Envelope::UrlVerification { challenge } => InboundPayload::Verification { challenge },
        Envelope::EventCallback { event } | Envelope::AppMention { event } => {
            match event.into_mention() {
                Some(m) => InboundPayload::Mention(m),
                None => InboundPayload::Ignored,
            }
        }
        Envelope::Other => InboundPayload::Ignored,
    }
}
