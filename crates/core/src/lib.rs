pub mod cache;
pub mod chat;
pub mod domain;
pub mod source;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_CACHE_TTL_SECS: u64 = 300;
    const DEFAULT_FETCH_LIMIT: i64 = 50;
    const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;
    const DEFAULT_MAX_SESSIONS: usize = 10_000;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SourceKind {
        Postgres,
        Supabase,
    }

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub supabase_url: Option<String>,
        pub supabase_service_role_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub broker_source: Option<String>,
        pub broker_cache_ttl: Duration,
        pub broker_fetch_limit: i64,
        pub chat_thinking_delay: Duration,
        /// Chat sessions untouched for this long are dropped by the API.
        pub chat_session_idle: Duration,
        pub chat_max_sessions: usize,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let broker_cache_ttl_secs = parse_env("BROKER_CACHE_TTL_SECS")?
                .unwrap_or(DEFAULT_CACHE_TTL_SECS);
            let broker_fetch_limit =
                parse_env::<i64>("BROKER_FETCH_LIMIT")?.unwrap_or(DEFAULT_FETCH_LIMIT);
            anyhow::ensure!(
                broker_fetch_limit >= 1,
                "BROKER_FETCH_LIMIT must be >= 1 (got {broker_fetch_limit})"
            );
            let delay_ms = parse_env::<u64>("CHAT_THINKING_DELAY_MS")?.unwrap_or(0);
            let session_idle_secs =
                parse_env("CHAT_SESSION_IDLE_SECS")?.unwrap_or(DEFAULT_SESSION_IDLE_SECS);
            anyhow::ensure!(
                session_idle_secs >= 1,
                "CHAT_SESSION_IDLE_SECS must be >= 1 (got {session_idle_secs})"
            );
            let chat_max_sessions =
                parse_env::<usize>("CHAT_MAX_SESSIONS")?.unwrap_or(DEFAULT_MAX_SESSIONS);
            anyhow::ensure!(
                chat_max_sessions >= 1,
                "CHAT_MAX_SESSIONS must be >= 1 (got {chat_max_sessions})"
            );

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                supabase_url: std::env::var("SUPABASE_URL").ok(),
                supabase_service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                broker_source: std::env::var("BROKER_SOURCE")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                broker_cache_ttl: Duration::from_secs(broker_cache_ttl_secs),
                broker_fetch_limit,
                chat_thinking_delay: Duration::from_millis(delay_ms),
                chat_session_idle: Duration::from_secs(session_idle_secs),
                chat_max_sessions,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_supabase_url(&self) -> anyhow::Result<&str> {
            self.supabase_url
                .as_deref()
                .context("SUPABASE_URL is required")
        }

        pub fn require_supabase_service_role_key(&self) -> anyhow::Result<&str> {
            self.supabase_service_role_key
                .as_deref()
                .context("SUPABASE_SERVICE_ROLE_KEY is required")
        }

        /// Explicit `BROKER_SOURCE` wins; otherwise Postgres when a DSN is configured.
        pub fn source_kind(&self) -> anyhow::Result<SourceKind> {
            match self.broker_source.as_deref().map(str::trim) {
                Some(s) if s.eq_ignore_ascii_case("postgres") => Ok(SourceKind::Postgres),
                Some(s) if s.eq_ignore_ascii_case("supabase") => Ok(SourceKind::Supabase),
                Some(other) => anyhow::bail!(
                    "BROKER_SOURCE must be 'postgres' or 'supabase' (got {other:?})"
                ),
                None if self.database_url.is_some() => Ok(SourceKind::Postgres),
                None => Ok(SourceKind::Supabase),
            }
        }
    }

    fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match std::env::var(key) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{key} is invalid ({raw:?}): {e}")),
            _ => Ok(None),
        }
    }

}
