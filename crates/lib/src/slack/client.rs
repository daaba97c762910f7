//! Slack Web API client: auth.test, conversations.replies, users.info, chat.postMessage.

use crate::slack::platform::{
    BotIdentity, ChatPlatform, ReplyRequest, SlackError, ThreadReplies, ThreadReply,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const SLACK_API_BASE: &str = "https://slack.com/api";
const REPLIES_PAGE_LIMIT: &str = "200";

#[derive(Debug, Deserialize)]
struct SlackResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Deserialize)]
struct AuthTestBody {
    user_id: Option<String>,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepliesBody {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersInfoBody {
    user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmptyBody {}

impl SlackUser {
    fn best_name(&self) -> Option<String> {
        let profile_name = self.profile.as_ref().and_then(|p| p.display_name.clone());
        [profile_name, self.real_name.clone(), self.name.clone()]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
    }
}

/// Slack bot client. Display names looked up via users.info are cached for the process lifetime.
#[derive(Clone)]
pub struct SlackClient {
    api_base: String,
    token: Option<String>,
    client: reqwest::Client,
    user_names: Arc<RwLock<HashMap<String, String>>>,
}

impl SlackClient {
    pub fn new(token: Option<String>, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| SLACK_API_BASE.to_string());
        Self {
            api_base,
            token,
            client: reqwest::Client::new(),
            user_names: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn token(&self) -> Result<&str, SlackError> {
        self.token.as_deref().ok_or(SlackError::MissingToken)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let url = format!("{}/{}", self.api_base, method);
        let req = self.client.get(&url).bearer_auth(self.token()?).query(query);
        self.send(method, req).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &serde_json::Value,
    ) -> Result<T, SlackError> {
        let url = format!("{}/{}", self.api_base, method);
        let req = self.client.post(&url).bearer_auth(self.token()?).json(body);
        self.send(method, req).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, SlackError> {
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SlackError::Api {
                method,
                error: format!("{} {}", status, body),
            });
        }
        let data: SlackResponse<T> = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api {
                method,
                error: data.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(data.body)
    }

    /// Resolve a user's display name, falling back to the user id when users.info fails.
    async fn display_name(&self, user_id: &str) -> String {
        if let Some(name) = self.user_names.read().await.get(user_id) {
            return name.clone();
        }
        let name = match self.get::<UsersInfoBody>("users.info", &[("user", user_id)]).await {
            Ok(body) => body.user.and_then(|u| u.best_name()),
            Err(e) => {
                log::debug!("slack: users.info for {} failed: {}", user_id, e);
                None
            }
        };
        match name {
            Some(name) => {
                self.user_names
                    .write()
                    .await
                    .insert(user_id.to_string(), name.clone());
                name
            }
            None => user_id.to_string(),
        }
    }

    async fn to_reply(&self, msg: SlackMessage) -> ThreadReply {
        let (actor_id, display_name) = match (msg.user, msg.bot_id) {
            (Some(user), _) => {
                let name = match msg.username {
                    Some(n) if !n.trim().is_empty() => n,
                    _ => self.display_name(&user).await,
                };
                (user, name)
            }
            (None, Some(bot)) => {
                let name = msg.username.unwrap_or_else(|| bot.clone());
                (bot, name)
            }
            (None, None) => ("unknown".to_string(), msg.username.unwrap_or_default()),
        };
        ThreadReply {
            actor_id,
            display_name,
            text: msg.text,
            ts: msg.ts,
        }
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn identity(&self) -> Result<BotIdentity, SlackError> {
        let body: AuthTestBody = self.post("auth.test", &serde_json::json!({})).await?;
        let user_id = body
            .user_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SlackError::Api {
                method: "auth.test",
                error: "missing user_id".to_string(),
            })?;
        let display_name = body.user.unwrap_or_else(|| user_id.clone());
        Ok(BotIdentity {
            user_id,
            display_name,
        })
    }

    async fn fetch_replies(&self, channel_id: &str, thread_ts: &str) -> Result<ThreadReplies, SlackError> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![
                ("channel", channel_id),
                ("ts", thread_ts),
                ("limit", REPLIES_PAGE_LIMIT),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.as_str()));
            }
            let page: RepliesBody = self.get("conversations.replies", &query).await?;
            messages.extend(page.messages);
            cursor = page
                .response_metadata
                .and_then(|m| m.next_cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }
        let mut replies = Vec::with_capacity(messages.len());
        for msg in messages {
            replies.push(self.to_reply(msg).await);
        }
        Ok(ThreadReplies::from_replies(replies))
    }

    async fn post_reply(&self, reply: &ReplyRequest) -> Result<(), SlackError> {
        let body = serde_json::json!({
            "channel": reply.channel_id,
            "thread_ts": reply.thread_ts,
            "text": reply.text,
        });
        let _: EmptyBody = self.post("chat.postMessage", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> SlackClient {
        SlackClient::new(Some("xoxb-test".to_string()), Some(server.base_url()))
    }

    #[tokio::test]
    async fn identity_reads_auth_test() {
        let server = MockServer::start();
        let auth = server.mock(|when, then| {
            when.method(POST)
                .path("/auth.test")
                .header("authorization", "Bearer xoxb-test");
            then.status(200)
                .json_body(json!({"ok": true, "user_id": "UBOT", "user": "helper"}));
        });
        let id = client(&server).identity().await.expect("identity");
        assert_eq!(id.user_id, "UBOT");
        assert_eq!(id.display_name, "helper");
        auth.assert_calls(1);
    }

    #[tokio::test]
    async fn api_errors_surface_method_and_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth.test");
            then.status(200).json_body(json!({"ok": false, "error": "invalid_auth"}));
        });
        let err = client(&server).identity().await.unwrap_err();
        assert!(matches!(err, SlackError::Api { method: "auth.test", ref error } if error == "invalid_auth"));
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let client = SlackClient::new(None, Some("http://127.0.0.1:1".to_string()));
        assert!(matches!(client.identity().await, Err(SlackError::MissingToken)));
    }

    #[tokio::test]
    async fn fetch_replies_pages_and_resolves_names_in_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.replies")
                .query_param("channel", "C1")
                .query_param("ts", "100.0")
                .query_param("cursor", "page2");
            then.status(200).json_body(json!({
                "ok": true,
                "messages": [
                    {"user": "UBOT", "username": "helper", "text": "sure", "ts": "102.0"}
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.replies")
                .query_param("channel", "C1")
                .query_param("ts", "100.0")
                .query_param_missing("cursor");
            then.status(200).json_body(json!({
                "ok": true,
                "messages": [
                    {"user": "U1", "text": "hi", "ts": "100.0"},
                    {"bot_id": "B9", "username": "deploybot", "text": "deployed", "ts": "101.0"}
                ],
                "response_metadata": {"next_cursor": "page2"}
            }));
        });
        let users = server.mock(|when, then| {
            when.method(GET).path("/users.info").query_param("user", "U1");
            then.status(200).json_body(json!({
                "ok": true,
                "user": {"name": "ali", "real_name": "Ali A", "profile": {"display_name": ""}}
            }));
        });

        let thread = client(&server).fetch_replies("C1", "100.0").await.expect("replies");
        let actors: Vec<_> = thread.replies.iter().map(|r| r.actor_id.as_str()).collect();
        assert_eq!(actors, vec!["U1", "B9", "UBOT"]);
        assert_eq!(thread.replies[0].display_name, "Ali A");
        assert_eq!(thread.replies[1].display_name, "deploybot");
        assert_eq!(thread.replies[2].ts.as_deref(), Some("102.0"));
        assert_eq!(thread.participants.len(), 3);
        users.assert_calls(1);
    }

    #[tokio::test]
    async fn post_reply_targets_the_thread() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .json_body(json!({"channel": "C1", "thread_ts": "100.0", "text": "hi there"}));
            then.status(200).json_body(json!({"ok": true, "channel": "C1", "ts": "103.0"}));
        });
        client(&server)
            .post_reply(&ReplyRequest {
                channel_id: "C1".to_string(),
                thread_ts: "100.0".to_string(),
                text: "hi there".to_string(),
            })
            .await
            .expect("post");
        post.assert_calls(1);
    }
}
