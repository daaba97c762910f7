//! Gateway HTTP server: Slack Events API webhook plus health probe.

use crate::agent::{agent_from_config, Agent};
use crate::config::{self, Config};
use crate::gateway::signature;
use crate::pipeline::Responder;
use crate::slack::{classify, ChatPlatform, InboundPayload, SlackClient};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, inbound webhook requests must carry a valid Slack signature.
    pub signing_secret: Option<String>,
    pub responder: Arc<Responder>,
    /// Mention cycles spawned by the webhook; awaited during graceful shutdown.
    pub cycle_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl GatewayState {
    pub fn new(config: Config, responder: Arc<Responder>) -> Self {
        let signing_secret = config::resolve_signing_secret(&config);
        Self {
            config: Arc::new(config),
            signing_secret,
            responder,
            cycle_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Wire the Slack client and the configured agent into a responder.
pub fn responder_from_config(config: &Config) -> Result<Responder> {
    let slack: Arc<dyn ChatPlatform> = Arc::new(SlackClient::new(
        config::resolve_slack_token(config),
        config.slack.api_base.clone(),
    ));
    let agent: Arc<dyn Agent> = Arc::new(agent_from_config(config).context("building tool bindings")?);
    Ok(Responder::new(slack, agent, config.agent.lock_cooldown()))
}

/// Routes served by the gateway. `/slack/events` is an alias of `/interactivity`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/interactivity", post(slack_events))
        .route("/slack/events", post(slack_events))
        .with_state(state)
}

pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config::resolve_signing_secret(&config).is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without request verification (set slack.signingSecret or SLACK_SIGNING_SECRET)",
            bind
        );
    }
    if config::resolve_slack_token(&config).is_none() {
        log::warn!("no Slack token configured (slack.accessToken or SLACK_ACCESS_TOKEN); mentions will fail");
    }
    if config::resolve_api_key(&config).is_none() {
        log::warn!("no model API key configured (agent.apiKey or OPENAI_API_KEY); agent turns will fail");
    }

    let responder = Arc::new(responder_from_config(&config)?);
    let port = config.gateway.port;
    let state = GatewayState::new(config, responder);
    if state.signing_secret.is_none() {
        log::warn!("no signing secret configured; inbound requests are not verified");
    }
    let cycle_tasks = state.cycle_tasks.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cycle_tasks))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Lets mention cycles that are already running finish before returning.
async fn shutdown_signal(cycle_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, waiting for running mention cycles");

    let tasks: Vec<JoinHandle<()>> = cycle_tasks.lock().await.drain(..).collect();
    for handle in tasks {
        let _ = handle.await;
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// POST /interactivity: Slack Events API deliveries.
///
/// URL verification is answered with the challenge. Mentions are acknowledged at
/// once and handled in a spawned cycle, so Slack's 3 second delivery timeout is
/// never hit by a model call. Everything else is acknowledged and ignored.
async fn slack_events(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(ref secret) = state.signing_secret {
        if let Err(e) = signature::verify_request(secret, &headers, &body, now_unix()) {
            log::warn!("rejecting webhook request: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    if let Some(retry) = headers.get("x-slack-retry-num").and_then(|v| v.to_str().ok()) {
        log::debug!("slack redelivery #{}", retry);
    }

    match classify(&body) {
        InboundPayload::Verification { challenge } => {
            log::info!("answering url_verification challenge");
            ([(header::CONTENT_TYPE, "text/plain")], challenge).into_response()
        }
        InboundPayload::Mention(event) => {
            let responder = state.responder.clone();
            let handle = tokio::spawn(async move {
                responder.handle_mention(event).await;
            });
            let mut tasks = state.cycle_tasks.lock().await;
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
            StatusCode::OK.into_response()
        }
        InboundPayload::Ignored => StatusCode::OK.into_response(),
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "busyThreads": state.responder.busy_threads(),
    }))
}
