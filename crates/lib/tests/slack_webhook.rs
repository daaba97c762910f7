//! Integration tests for the Events API webhook, with Slack and the model endpoint mocked.

use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use threadbot::config::Config;
use threadbot::gateway::{self, signature, GatewayState};

const THREAD_TS: &str = "1742291226.513489";

fn config_for(slack: &MockServer, model: &MockServer) -> Config {
    let mut config = Config::default();
    config.slack.access_token = Some("xoxb-test".to_string());
    config.slack.api_base = Some(slack.base_url());
    config.agent.api_key = Some("sk-test".to_string());
    config.agent.base_url = Some(model.base_url());
    config.agent.workspace = Some(std::env::temp_dir().join(format!("threadbot-webhook-{}", uuid::Uuid::new_v4())));
    config
}

/// The signing secret is set on the state directly so SLACK_SIGNING_SECRET in the environment cannot change it.
async fn spawn_gateway(config: Config, signing_secret: Option<&str>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let responder = Arc::new(gateway::responder_from_config(&config).expect("responder"));
    let mut state = GatewayState::new(config, responder);
    state.signing_secret = signing_secret.map(str::to_string);
    tokio::spawn(async move {
        let _ = axum::serve(listener, gateway::router(state)).await;
    });
    format!("http://{}", addr)
}

fn mention_body(actor: &str, text: &str) -> String {
    json!({
        "token": "unused",
        "team_id": "T1",
        "type": "event_callback",
        "event": {
            "type": "app_mention",
            "user": actor,
            "ts": "1742291465.809079",
            "thread_ts": THREAD_TS,
            "text": text,
            "team": "T1",
            "channel": "C1"
        }
    })
    .to_string()
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let (slack, model) = (MockServer::start(), MockServer::start());
    let base = spawn_gateway(config_for(&slack, &model), None).await;

    let res = reqwest::Client::new()
        .post(format!("{}/interactivity", base))
        .body(json!({"type": "url_verification", "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"}).to_string())
        .send()
        .await
        .expect("request");
    assert_eq!(res.status(), 200);
    assert!(res
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .starts_with("text/plain"));
    assert_eq!(
        res.text().await.expect("body"),
        "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
    );
}

#[tokio::test]
async fn other_payloads_are_acknowledged_and_ignored() {
    let (slack, model) = (MockServer::start(), MockServer::start());
    let auth = slack.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(200).json_body(json!({"ok": true, "user_id": "UBOT", "user": "helper"}));
    });
    let base = spawn_gateway(config_for(&slack, &model), None).await;
    let client = reqwest::Client::new();

    for body in [
        "not json".to_string(),
        json!({"type": "event_callback", "event": {"type": "message", "user": "U1", "text": "hi", "ts": "1.0", "channel": "C1"}}).to_string(),
        json!({"type": "app_rate_limited"}).to_string(),
    ] {
        let res = client
            .post(format!("{}/slack/events", base))
            .body(body)
            .send()
            .await
            .expect("request");
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.expect("body"), "");
    }
    auth.assert_calls(0);
}

#[tokio::test]
async fn mention_gets_a_threaded_reply() {
    let (slack, model) = (MockServer::start(), MockServer::start());
    slack.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(200).json_body(json!({"ok": true, "user_id": "UBOT", "user": "helper"}));
    });
    slack.mock(|when, then| {
        when.method(GET)
            .path("/conversations.replies")
            .query_param("channel", "C1")
            .query_param("ts", THREAD_TS);
        then.status(200).json_body(json!({
            "ok": true,
            "messages": [
                {"user": "U1", "username": "ali", "text": "hi", "ts": THREAD_TS},
                {"user": "U1", "username": "ali", "text": "<@UBOT> hello", "ts": "1742291465.809079"}
            ]
        }));
    });
    let completion = model.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .body_includes("gpt-4o-mini")
            .body_includes("<@UBOT> hello");
        then.status(200).json_body(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        }));
    });
    let post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .json_body(json!({"channel": "C1", "thread_ts": THREAD_TS, "text": "hi there"}));
        then.status(200).json_body(json!({"ok": true, "channel": "C1", "ts": "1742291470.000100"}));
    });

    let base = spawn_gateway(config_for(&slack, &model), None).await;
    let res = reqwest::Client::new()
        .post(format!("{}/interactivity", base))
        .body(mention_body("U1", "<@UBOT> hello"))
        .send()
        .await
        .expect("request");
    assert_eq!(res.status(), 200);

    assert!(wait_for(|| post.calls() >= 1).await, "no reply was posted");
    completion.assert_calls(1);
    post.assert_calls(1);
}

#[tokio::test]
async fn redelivered_mention_is_answered_once() {
    let (slack, model) = (MockServer::start(), MockServer::start());
    slack.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(200).json_body(json!({"ok": true, "user_id": "UBOT", "user": "helper"}));
    });
    slack.mock(|when, then| {
        when.method(GET).path("/conversations.replies");
        then.status(200).json_body(json!({
            "ok": true,
            "messages": [{"user": "U1", "username": "ali", "text": "<@UBOT> hello", "ts": "1742291465.809079"}]
        }));
    });
    let completion = model.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200)
            .delay(Duration::from_millis(200))
            .json_body(json!({"choices": [{"message": {"role": "assistant", "content": "hi there"}}]}));
    });
    let post = slack.mock(|when, then| {
        when.method(POST).path("/chat.postMessage");
        then.status(200).json_body(json!({"ok": true}));
    });

    let base = spawn_gateway(config_for(&slack, &model), None).await;
    let client = reqwest::Client::new();
    for _ in 0..3 {
        let res = client
            .post(format!("{}/interactivity", base))
            .header("x-slack-retry-num", "1")
            .body(mention_body("U1", "<@UBOT> hello"))
            .send()
            .await
            .expect("request");
        assert_eq!(res.status(), 200);
    }

    assert!(wait_for(|| post.calls() >= 1).await, "no reply was posted");
    tokio::time::sleep(Duration::from_millis(300)).await;
    completion.assert_calls(1);
    post.assert_calls(1);
}

#[tokio::test]
async fn signed_requests_are_verified() {
    let (slack, model) = (MockServer::start(), MockServer::start());
    let base = spawn_gateway(config_for(&slack, &model), Some("test-signing-secret")).await;
    let client = reqwest::Client::new();
    let url = format!("{}/interactivity", base);
    let body = json!({"type": "url_verification", "challenge": "abc"}).to_string();
    let ts = chrono::Utc::now().timestamp().to_string();

    let unsigned = client.post(&url).body(body.clone()).send().await.expect("request");
    assert_eq!(unsigned.status(), 401);

    let forged = client
        .post(&url)
        .header(signature::TIMESTAMP_HEADER, &ts)
        .header(signature::SIGNATURE_HEADER, signature::sign("wrong-secret", &ts, body.as_bytes()))
        .body(body.clone())
        .send()
        .await
        .expect("request");
    assert_eq!(forged.status(), 401);

    let signed = client
        .post(&url)
        .header(signature::TIMESTAMP_HEADER, &ts)
        .header(
            signature::SIGNATURE_HEADER,
            signature::sign("test-signing-secret", &ts, body.as_bytes()),
        )
        .body(body)
        .send()
        .await
        .expect("request");
    assert_eq!(signed.status(), 200);
    assert_eq!(signed.text().await.expect("body"), "abc");
}
