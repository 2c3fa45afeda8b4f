//! Axum-based HTTP gateway.
//!
//! - Admin session routes (`/admin/login`, `/admin/logout`, `/admin/check-auth`,
//!   `/admin/profile`)
//! - One CRUD route set per record collection (see [`records`])
//! - `/chat` WebSocket relay
//! - Request body limit (64KB) and request timeout (30s)

pub mod error;
pub mod records;

use crate::auth::{
    session, CredentialStore, SessionIssuer, SessionVerifier, SqliteCredentialStore,
    StaticCredentialStore, TokenCodec,
};
use crate::chat::{display_name, ChatRelay};
use crate::config::{Config, CredentialSource};
use crate::records::{CollectionSpec, RecordStore, SqliteRecordStore};
use anyhow::{Context, Result};
use axum::{
    extract::{
        connect_info::ConnectInfo,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Query, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use error::ApiError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Sliding window used by login rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// How often the rate limiter sweeps stale client entries from its map.
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300; // 5 minutes

#[derive(Debug)]
struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or(now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Periodic sweep: remove clients with no recent requests
        if last_sweep.elapsed() >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS) {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

#[derive(Debug)]
pub struct GatewayRateLimiter {
    login: SlidingWindowRateLimiter,
}

impl GatewayRateLimiter {
    pub fn new(login_per_minute: u32) -> Self {
        Self {
            login: SlidingWindowRateLimiter::new(
                login_per_minute,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            ),
        }
    }

    fn allow_login(&self, key: &str) -> bool {
        self.login.allow(key)
    }
}

fn client_key_from_headers(headers: &HeaderMap) -> Option<String> {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_owned());
            }
        }
    }
    None
}

/// Client address: the socket peer, or the proxy headers when
/// `trust_forwarded_headers` is set.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = if state.trust_forwarded_headers {
            client_key_from_headers(&parts.headers)
        } else {
            None
        };
        let addr = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".into());
        Ok(Self(addr))
    }
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub issuer: SessionIssuer,
    pub verifier: SessionVerifier,
    pub records: Arc<dyn RecordStore>,
    pub chat: ChatRelay,
    pub rate_limiter: Arc<GatewayRateLimiter>,
    /// Add `Secure` to the session cookie.
    pub cookie_secure: bool,
    /// Read the client address from proxy headers.
    pub trust_forwarded_headers: bool,
}

impl AppState {
    /// Wire stores, token codec and relay from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let secret = config.jwt_secret()?;
        let codec = TokenCodec::new(secret, config.auth.token_ttl_secs);

        let credentials: Arc<dyn CredentialStore> = match config.auth.credential_source {
            CredentialSource::Config => {
                let username = config.auth.admin_username.as_deref().unwrap_or_default();
                let hash = config.auth.admin_password_hash.as_deref().unwrap_or_default();
                Arc::new(StaticCredentialStore::new(username, hash)?)
            }
            CredentialSource::Database => {
                let store = SqliteCredentialStore::open(&config.storage.db_path)?;
                if store.count()? == 0 {
                    tracing::warn!(
                        "No admin credentials in the database; add one with `formdesk admin add`"
                    );
                }
                Arc::new(store)
            }
        };

        let records = SqliteRecordStore::open(&config.storage.db_path)?;
        tracing::info!(
            path = %config.storage.db_path.display(),
            "Record store initialized"
        );

        Ok(Self {
            issuer: SessionIssuer::new(credentials, codec.clone()),
            verifier: SessionVerifier::new(codec, &config.auth.cookie_name),
            records: Arc::new(records),
            chat: ChatRelay::new(config.chat.capacity, config.chat.max_message_chars),
            rate_limiter: Arc::new(GatewayRateLimiter::new(
                config.gateway.login_rate_limit_per_minute,
            )),
            cookie_secure: config.auth.cookie_secure,
            trust_forwarded_headers: config.gateway.trust_forwarded_headers,
        })
    }
}

/// Build the full router for the given collections.
pub fn build_router(state: AppState, collections: &[CollectionSpec]) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/login", post(handle_login))
        .route("/admin/login", post(handle_login))
        .route("/admin/logout", post(handle_logout))
        .route("/admin/check-auth", get(handle_check_auth))
        .route("/admin/profile", get(handle_profile))
        .route("/chat", get(handle_chat_ws));

    for spec in collections {
        app = app.merge(records::collection_router(spec.clone()));
    }

    app.with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until Ctrl+C / SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let collections = config.effective_collections();
    let state = AppState::from_config(&config)?;
    let app = build_router(state, &collections);

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("Invalid gateway host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr()?;

    tracing::info!(
        addr = %local,
        collections = ?collections.iter().map(|c| c.path.as_str()).collect::<Vec<_>>(),
        "Gateway listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health: Always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "chat_listeners": state.chat.listener_count(),
    }))
}

/// Request body for login. `email` is accepted as an alias for `username`.
#[derive(Deserialize)]
struct LoginBody {
    #[serde(alias = "email")]
    username: String,
    password: String,
}

/// POST /admin/login: Check credentials, return a token and set the session cookie.
async fn handle_login(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    if !state.rate_limiter.allow_login(&client) {
        tracing::warn!("Login rate limit exceeded for client: {client}");
        return Err(ApiError::RateLimited {
            retry_after_secs: RATE_LIMIT_WINDOW_SECS,
        });
    }

    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let issued = state.issuer.login(&body.username, &body.password)?;

    let cookie = session::session_cookie(
        state.verifier.cookie_name(),
        &issued.token,
        state.issuer.token_ttl_secs(),
        state.cookie_secure,
    );

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({
            "success": true,
            "message": "Logged in successfully",
            "token": issued.token,
            "expires_at": issued.claims.exp,
        })),
    )
        .into_response())
}

/// POST /admin/logout: Clear the session cookie. The token itself stays
/// valid until it expires.
async fn handle_logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = session::clear_session_cookie(state.verifier.cookie_name(), state.cookie_secure);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({
            "success": true,
            "message": "Logged out successfully",
        })),
    )
}

/// GET /admin/check-auth
async fn handle_check_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.verifier.require_admin(&headers)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "isAuthenticated": true,
    })))
}

/// GET /admin/profile: The decoded identity of the current session.
async fn handle_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = state.verifier.require_admin(&headers)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "subject": claims.sub,
        "role": claims.role,
        "issued_at": claims.iat,
        "expires_at": claims.exp,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct ChatQuery {
    #[serde(default)]
    name: Option<String>,
}

/// GET /chat: WebSocket upgrade for the chat relay.
///
/// Every text frame a client sends is broadcast to all connected clients,
/// the sender included. The server keeps no history.
async fn handle_chat_ws(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let name = display_name(query.name.as_deref());
    let relay = state.chat.clone();
    ws.on_upgrade(move |socket| handle_chat_connection(socket, relay, name))
}

/// Handle a single chat WebSocket connection.
async fn handle_chat_connection(socket: WebSocket, relay: ChatRelay, name: String) {
    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::broadcast::error::RecvError;

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut broadcast_rx = relay.subscribe();
    tracing::debug!(name = %name, "Chat WebSocket connected");

    // Forward relayed messages to this client
    let send_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => {
                    let Ok(json) = serde_json::to_string(&msg) else {
                        continue;
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Chat listener lagged, skipping ahead");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Receive messages from this client and relay them to everyone
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                if let Err(e) = relay.publish(&name, text.as_str()) {
                    tracing::debug!(name = %name, "Chat message dropped: {e}");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    tracing::debug!(name = %name, "Chat WebSocket disconnected");
}
