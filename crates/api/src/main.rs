use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use brokerbot_core::cache::BrokerCache;
use brokerbot_core::chat::ChatSession;
use brokerbot_core::config::{Settings, SourceKind};
use brokerbot_core::domain::broker::BrokerSnapshot;
use brokerbot_core::source::{BrokerSource, StaticBrokerSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let source = build_source(&settings).await;
    let cache = Arc::new(BrokerCache::from_settings(source, &settings));
    let state = AppState::new(cache, settings.chat_thinking_delay).with_session_limits(
        settings.chat_session_idle,
        settings.chat_max_sessions,
    );
    spawn_session_sweeper(state.clone());

    let app = app(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Picks the configured broker source. Anything that prevents using it starts the API in degraded
/// mode, where every data-backed reply is the "database unavailable" message.
async fn build_source(settings: &Settings) -> Arc<dyn BrokerSource> {
    let degraded = || -> Arc<dyn BrokerSource> { Arc::new(StaticBrokerSource::default()) };

    match settings.source_kind() {
        Ok(SourceKind::Postgres) => match settings.require_database_url() {
            Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
            {
                Ok(pool) => match brokerbot_core::storage::migrate(&pool).await {
                    Ok(()) => Arc::new(brokerbot_core::source::postgres::PgBrokerSource::new(pool)),
                    Err(e) => {
                        sentry_anyhow::capture_anyhow(&e);
                        tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                        degraded()
                    }
                },
                Err(e) => {
                    let err = anyhow::Error::new(e);
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                    degraded()
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
                degraded()
            }
        },
        Ok(SourceKind::Supabase) => {
            match brokerbot_core::source::supabase::SupabaseBrokerSource::from_settings(settings) {
                Ok(source) => Arc::new(source),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "supabase not configured; starting API in degraded mode");
                    degraded()
                }
            }
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "invalid BROKER_SOURCE; starting API in degraded mode");
            degraded()
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/brokers", get(list_brokers))
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id", delete(delete_session))
        .route(
            "/sessions/:session_id/messages",
            post(send_message).delete(clear_conversation),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

type SessionHandle = Arc<Mutex<ChatSession>>;

const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct SessionEntry {
    handle: SessionHandle,
    last_used: Instant,
}

#[derive(Clone)]
struct AppState {
    cache: Arc<BrokerCache>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    thinking_delay: Duration,
    session_idle: Duration,
    max_sessions: usize,
}

impl AppState {
    fn new(cache: Arc<BrokerCache>, thinking_delay: Duration) -> Self {
        Self {
            cache,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            thinking_delay,
            session_idle: DEFAULT_SESSION_IDLE,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    fn with_session_limits(mut self, idle: Duration, max_sessions: usize) -> Self {
        self.session_idle = idle;
        self.max_sessions = max_sessions.max(1);
        self
    }

    fn is_idle(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_used) >= self.session_idle
    }

    /// Looks up a live session and marks it used. An expired session is removed and reported
    /// as missing.
    async fn session(&self, id: Uuid) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        if self.is_idle(entry, now) {
            sessions.remove(&id);
            tracing::info!(session_id = %id, "chat session expired");
            return None;
        }
        entry.last_used = now;
        Some(Arc::clone(&entry.handle))
    }

    async fn insert_session(&self, session: ChatSession) -> Uuid {
        let now = Instant::now();
        let session_id = session.id();
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            self.evict_idle_locked(&mut sessions, now);
        }
        if sessions.len() >= self.max_sessions {
            // Still full of live sessions: drop the least recently used one.
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                tracing::warn!(session_id = %oldest, max_sessions = self.max_sessions, "session limit reached; evicted least recently used");
            }
        }

        sessions.insert(
            session_id,
            SessionEntry {
                handle: Arc::new(Mutex::new(session)),
                last_used: now,
            },
        );
        session_id
    }

    async fn evict_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        self.evict_idle_locked(&mut sessions, now)
    }

    fn evict_idle_locked(&self, sessions: &mut HashMap<Uuid, SessionEntry>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_idle(entry, now));
        before - sessions.len()
    }
}

/// Periodically drops sessions whose clients went away without deleting them.
fn spawn_session_sweeper(state: AppState) {
    let period = (state.session_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let evicted = state.evict_idle(Instant::now()).await;
            if evicted > 0 {
                tracing::info!(evicted, "expired idle chat sessions");
            }
        }
    });
}

#[derive(Debug, Serialize)]
struct ApiSession {
    session_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ApiMessageRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ApiMessageReply {
    reply: String,
    turns: usize,
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<ApiSession>) {
    let session = ChatSession::new(Arc::clone(&state.cache)).with_thinking_delay(state.thinking_delay);
    let session_id = state.insert_session(session).await;

    tracing::info!(%session_id, "chat session created");
    (StatusCode::CREATED, Json(ApiSession { session_id }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ApiMessageRequest>,
) -> Result<Json<ApiMessageReply>, StatusCode> {
    let handle = state.session(session_id).await.ok_or(StatusCode::NOT_FOUND)?;

    // The per-session lock keeps exchanges of one conversation in submission order.
    let mut session = handle.lock().await;
    let reply = session.send_message(&req.text).await;

    Ok(Json(ApiMessageReply {
        reply,
        turns: session.context().len(),
    }))
}

async fn clear_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> StatusCode {
    match state.session(session_id).await {
        Some(handle) => {
            handle.lock().await.clear_conversation();
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn delete_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> StatusCode {
    match state.sessions.write().await.remove(&session_id) {
        Some(_) => {
            tracing::info!(%session_id, "chat session deleted");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn list_brokers(
    State(state): State<AppState>,
) -> Result<Json<Vec<BrokerSnapshot>>, StatusCode> {
    let brokers = state.cache.get_brokers().await;
    if brokers.is_empty() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(brokers.to_vec()))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use brokerbot_core::chat::UNAVAILABLE_REPLY;
    use brokerbot_core::source::demo::demo_catalog;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state_with(brokers: Vec<BrokerSnapshot>) -> AppState {
        let source: Arc<dyn BrokerSource> = Arc::new(StaticBrokerSource::new(brokers));
        AppState::new(Arc::new(BrokerCache::new(source)), Duration::ZERO)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = call(app, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn chat_round_trip_and_reset() {
        let app = app(state_with(demo_catalog()));
        let id = new_session(&app).await;
        let uri = format!("/sessions/{id}/messages");

        let (status, body) = call(&app, "POST", &uri, Some(json!({"text": "recommend a broker"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].as_str().unwrap().contains("IC Markets"));
        assert_eq!(body["turns"], 2);

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = call(&app, "POST", &uri, Some(json!({"text": "hello"}))).await;
        assert_eq!(body["turns"], 2);
    }

    #[tokio::test]
    async fn sessions_keep_separate_context() {
        let app = app(state_with(demo_catalog()));
        let a = new_session(&app).await;
        let b = new_session(&app).await;

        call(&app, "POST", &format!("/sessions/{a}/messages"), Some(json!({"text": "recommend a broker"}))).await;
        let (_, body) = call(&app, "POST", &format!("/sessions/{b}/messages"), Some(json!({"text": "tell me more"}))).await;

        // Session b has no broker context, so this is not treated as a follow-up.
        assert!(body["reply"].as_str().unwrap().starts_with("I can help you compare"));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = app(state_with(demo_catalog()));
        let uri = format!("/sessions/{}/messages", Uuid::new_v4());
        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = new_session(&app).await;
        let (status, _) = call(&app, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_expires() {
        let state = state_with(demo_catalog()).with_session_limits(Duration::from_secs(60), 100);
        let app = app(state.clone());
        let id = new_session(&app).await;
        let uri = format!("/sessions/{id}/messages");

        tokio::time::advance(Duration::from_secs(45)).await;
        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hello"}))).await;
        assert_eq!(status, StatusCode::OK);

        // Use resets the idle clock.
        tokio::time::advance(Duration::from_secs(45)).await;
        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hello"}))).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::advance(Duration::from_secs(61)).await;
        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hello"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_idle_sessions() {
        let state = state_with(demo_catalog()).with_session_limits(Duration::from_secs(60), 100);
        let app = app(state.clone());
        let stale = new_session(&app).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = new_session(&app).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(state.evict_idle(Instant::now()).await, 1);

        let (status, _) = call(&app, "DELETE", &format!("/sessions/{stale}/messages"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &format!("/sessions/{fresh}/messages"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test(start_paused = true)]
    async fn session_count_is_capped() {
        let state = state_with(demo_catalog()).with_session_limits(Duration::from_secs(600), 3);
        let app = app(state.clone());

        let first = new_session(&app).await;
        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(1)).await;
            new_session(&app).await;
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        let newest = new_session(&app).await;

        assert_eq!(state.sessions.read().await.len(), 3);
        let (status, _) = call(&app, "DELETE", &format!("/sessions/{first}/messages"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &format!("/sessions/{newest}/messages"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn degraded_mode_answers_with_unavailable_message() {
        let app = app(state_with(Vec::new()));
        let (status, _) = call(&app, "GET", "/brokers", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let id = new_session(&app).await;
        let (_, body) = call(
            &app,
            "POST",
            &format!("/sessions/{id}/messages"),
            Some(json!({"text": "lowest spread please"})),
        )
        .await;
        assert_eq!(body["reply"], UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn lists_cached_brokers() {
        let app = app(state_with(demo_catalog()));
        let (status, body) = call(&app, "GET", "/brokers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), demo_catalog().len());
        assert_eq!(body[0]["name"], "IC Markets");
    }
}
