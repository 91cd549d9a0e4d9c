// File: src/auth/callback_server.rs
//
// Small axum surface for the two OAuth callbacks and the provider webhook.
// Everything stateful (session store, reconciler, token slots) is injected
// through the shared state; the handlers only translate HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_server::{Handle, Server};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use promobot_common::Error;
use promobot_common::models::PlatformConfig;
use promobot_common::traits::{RefreshTokenStore, TokenSink};

use crate::auth::OAuthSessionStore;
use crate::http::{HttpRequest, HttpTransport, NoRefresh, RetryPolicy, send_with_retry};
use crate::platforms::heygen::WebhookReconciler;
use crate::platforms::reddit::RedditAuthFlow;
use crate::platforms::twitter::TwitterAuthFlow;

const SIGNATURE_HEADER: &str = "x-heygen-signature";

pub struct CallbackServerState {
    pub transport: Arc<dyn HttpTransport>,
    pub sessions: Arc<OAuthSessionStore>,
    pub twitter_config: PlatformConfig,
    pub reddit_config: PlatformConfig,
    pub token_store: Option<Arc<dyn RefreshTokenStore>>,
    pub token_sink: Option<Arc<dyn TokenSink>>,
    pub reconciler: Arc<WebhookReconciler>,
    /// Base URL this process is reachable on, used to advertise the
    /// webhook endpoint.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub fn router(state: Arc<CallbackServerState>) -> Router {
    Router::new()
        .route("/auth/twitter/url", get(twitter_auth_url))
        .route("/auth/twitter/callback", get(twitter_callback))
        .route("/auth/reddit/url", get(reddit_auth_url))
        .route("/auth/reddit/callback", get(reddit_callback))
        .route("/webhooks/heygen", post(heygen_webhook))
        .route("/webhooks/heygen/info", get(webhook_info))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn start_callback_server(
    state: Arc<CallbackServerState>,
    port: u16,
) -> Result<oneshot::Sender<()>, Error> {
    let app = router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("callback server listening on http://{}", addr);

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    let handle = Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown_recv.await;
        handle_clone.graceful_shutdown(None);
    });

    let server = Server::bind(addr).handle(handle).serve(app.into_make_service());
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("callback server error: {}", e);
        }
        info!("callback server shut down.");
    });

    Ok(shutdown_send)
}

fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Authorization(_) => StatusCode::FORBIDDEN,
        Error::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(e: &Error) -> Json<Value> {
    Json(json!({ "error": e.to_string() }))
}

async fn twitter_auth_url(
    State(state): State<Arc<CallbackServerState>>,
) -> (StatusCode, Json<Value>) {
    let flow = TwitterAuthFlow::new(Arc::clone(&state.transport));
    match flow.build_authorization_url(&state.twitter_config, &state.sessions, None, None) {
        Ok((url, session_state)) => (
            StatusCode::OK,
            Json(json!({ "authorization_url": url, "state": session_state })),
        ),
        Err(e) => (error_status(&e), error_body(&e)),
    }
}

async fn twitter_callback(
    State(state): State<Arc<CallbackServerState>>,
    Query(query): Query<AuthQuery>,
) -> (StatusCode, Json<Value>) {
    if let Some(err) = query.error {
        let desc = query.error_description.unwrap_or_default();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err, "error_description": desc })),
        );
    }
    let (Some(code), Some(session_state)) = (query.code, query.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing code or state" })),
        );
    };

    let Some(session) = state.sessions.take(&session_state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid or expired state" })),
        );
    };

    let flow = TwitterAuthFlow::new(Arc::clone(&state.transport));
    let tokens = match flow
        .exchange_code(&state.twitter_config, &code, &session.code_verifier, None)
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("twitter code exchange failed: {e}");
            return (error_status(&e), error_body(&e));
        }
    };

    if let Some(sink) = &state.token_sink {
        if let Err(e) = sink.persist("twitter", &tokens).await {
            error!("failed to persist twitter tokens: {e}");
            return (error_status(&e), error_body(&e));
        }
    }

    // Label the linked account for the confirmation payload.
    let account_name = fetch_twitter_account_name(
        state.transport.as_ref(),
        &state.twitter_config,
        tokens.access_token.expose(),
    )
    .await
    .unwrap_or_else(|| "Twitter Account".to_string());

    (
        StatusCode::OK,
        Json(json!({
            "message": "Twitter account connected successfully",
            "platform": "twitter",
            "account_name": account_name,
        })),
    )
}

async fn fetch_twitter_account_name(
    transport: &dyn HttpTransport,
    config: &PlatformConfig,
    access_token: &str,
) -> Option<String> {
    let base = config
        .api_base_url
        .clone()
        .unwrap_or_else(|| crate::platforms::twitter::auth::DEFAULT_API_BASE.to_string());
    let request = HttpRequest::get(format!("{base}/2/users/me")).bearer(access_token);
    let response = send_with_retry(
        transport,
        &RetryPolicy::expecting(&[200]),
        request,
        &mut NoRefresh,
    )
    .await
    .ok()?;
    let payload = response.json_value().ok()?;
    payload
        .pointer("/data/name")
        .or_else(|| payload.pointer("/data/username"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

async fn reddit_auth_url(
    State(state): State<Arc<CallbackServerState>>,
) -> (StatusCode, Json<Value>) {
    let flow = RedditAuthFlow::new(Arc::clone(&state.transport));
    match flow.build_authorization_url(&state.reddit_config, None, None) {
        Ok((url, session_state)) => (
            StatusCode::OK,
            Json(json!({ "authorization_url": url, "state": session_state })),
        ),
        Err(e) => (error_status(&e), error_body(&e)),
    }
}

async fn reddit_callback(
    State(state): State<Arc<CallbackServerState>>,
    Query(query): Query<AuthQuery>,
) -> (StatusCode, Json<Value>) {
    if let Some(err) = query.error {
        let desc = query.error_description.unwrap_or_default();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err, "error_description": desc })),
        );
    }
    let Some(code) = query.code else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing code" })),
        );
    };

    let flow = RedditAuthFlow::new(Arc::clone(&state.transport));
    let tokens = match flow.exchange_code(&state.reddit_config, &code, None).await {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("reddit code exchange failed: {e}");
            return (error_status(&e), error_body(&e));
        }
    };

    // The refresh token is the durable credential for this flow.
    if let (Some(store), Some(refresh)) = (&state.token_store, &tokens.refresh_token) {
        let account = state
            .reddit_config
            .extra
            .get("account")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        if let Err(e) = store.save(&account, refresh.expose()).await {
            error!("failed to store reddit refresh token: {e}");
            return (error_status(&e), error_body(&e));
        }
    }
    if let Some(sink) = &state.token_sink {
        if let Err(e) = sink.persist("reddit", &tokens).await {
            error!("failed to persist reddit tokens: {e}");
            return (error_status(&e), error_body(&e));
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "message": "Reddit account connected successfully",
            "platform": "reddit",
        })),
    )
}

async fn heygen_webhook(
    State(state): State<Arc<CallbackServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.reconciler.process(&body, signature).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "message": outcome.message,
                "job_id": outcome.job_id,
                "status": outcome.status.to_string(),
            })),
        ),
        // Failures are answered, never dropped, so the provider does not
        // hammer the endpoint with retries it can't satisfy.
        Err(e) => {
            error!("webhook processing error: {e}");
            (error_status(&e), error_body(&e))
        }
    }
}

async fn webhook_info(
    State(state): State<Arc<CallbackServerState>>,
) -> (StatusCode, Json<Value>) {
    let webhook_url = state
        .public_base_url
        .as_ref()
        .map(|base| format!("{}/webhooks/heygen", base.trim_end_matches('/')));
    (
        StatusCode::OK,
        Json(json!({
            "webhook_url": webhook_url,
            "instructions": "Register this URL in the provider's webhook settings",
            "supports": ["avatar_video.success", "avatar_video.fail", "video.processing"],
        })),
    )
}
