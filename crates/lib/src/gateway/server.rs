//! Gateway HTTP server: health probe and the LINE webhook endpoint.

use crate::channels::{verify_signature, LineChannel, WebhookDelivery, SIGNATURE_HEADER};
use crate::config::{self, Config};
use crate::llm::{OpenAiClient, DEFAULT_MODEL};
use crate::relay::Relay;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Path the chat platform posts deliveries to.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Shared state for the gateway (relay clients, signing secret).
#[derive(Clone)]
pub struct GatewayState {
    pub relay: Relay,
    /// When Some, every webhook POST must carry a valid x-line-signature for this secret.
    /// `run_gateway` always sets it; None is only for routers built directly.
    pub channel_secret: Option<Arc<str>>,
    /// Port reported by the health probe.
    pub port: u16,
}

impl GatewayState {
    pub fn new(relay: Relay, channel_secret: Option<String>, port: u16) -> Self {
        Self {
            relay,
            channel_secret: channel_secret.map(Arc::from),
            port,
        }
    }
}

/// Routes: `GET /` health, `POST /webhook` deliveries.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(WEBHOOK_PATH, post(webhook))
        .with_state(state)
}

/// Build the clients from config, bind, and serve until SIGINT/SIGTERM.
/// Listens on `config.gateway.port` as given; callers resolve the PORT override first.
pub async fn run_gateway(config: Config) -> Result<()> {
    let access_token = config::resolve_channel_access_token(&config).context(
        "LINE channel access token not configured (set CHANNEL_ACCESS_TOKEN or channels.line.channelAccessToken)",
    )?;
    let api_key = config::resolve_completion_api_key(&config).context(
        "completion API key not configured (set OPENAI_API_KEY or completion.apiKey)",
    )?;
    let channel_secret = config::resolve_channel_secret(&config).context(
        "LINE channel secret not configured (set CHANNEL_SECRET or channels.line.channelSecret)",
    )?;
    let model = config
        .completion
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let port = config.gateway.port;

    let completion = Arc::new(OpenAiClient::new(api_key, config.completion.api_base.clone()));
    let line = Arc::new(LineChannel::new(
        access_token,
        config.channels.line.api_base.clone(),
    ));
    log::info!("relay: using completion model {}", model);
    let relay = Relay::new(completion, line, model);

    let app = router(GatewayState::new(relay, Some(channel_secret), port));

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// In-flight deliveries are allowed to finish.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
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
                log::error!("failed to install SIGTERM handler: {}", e);
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
    log::info!("shutdown signal received, draining in-flight deliveries");
}

/// POST /webhook — verifies the signature when a secret is set, relays every event, answers
/// 200 with the per-event results or 500 with an empty body if any event failed.
async fn webhook(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(ref secret) = state.channel_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, &body, provided) {
            log::warn!("webhook: rejected request with invalid signature");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let delivery: WebhookDelivery = match serde_json::from_slice(&body) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("webhook: malformed body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    log::debug!("webhook: {} event(s)", delivery.events.len());

    match state.relay.dispatch(&delivery.events).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => {
            log::error!("webhook: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}
