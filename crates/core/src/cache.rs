use crate::domain::broker::BrokerSnapshot;
use crate::source::BrokerSource;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FETCH_LIMIT: i64 = 50;

struct CachedBrokers {
    brokers: Arc<[BrokerSnapshot]>,
    fetched_at: DateTime<Utc>,
}

/// Single-slot, time-bounded cache of the active broker catalog.
///
/// While the slot is fresh every caller receives the same `Arc`; a refresh replaces the slot
/// wholesale. The lock is held across the fetch, so concurrent callers that find the slot stale
/// wait for one refresh instead of issuing their own.
pub struct BrokerCache {
    source: Arc<dyn BrokerSource>,
    ttl: Duration,
    limit: i64,
    slot: tokio::sync::Mutex<Option<CachedBrokers>>,
}

impl BrokerCache {
    pub fn new(source: Arc<dyn BrokerSource>) -> Self {
        Self::with_options(source, DEFAULT_TTL, DEFAULT_FETCH_LIMIT)
    }

    pub fn with_options(source: Arc<dyn BrokerSource>, ttl: Duration, limit: i64) -> Self {
        Self {
            source,
            ttl,
            limit,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_settings(
        source: Arc<dyn BrokerSource>,
        settings: &crate::config::Settings,
    ) -> Self {
        Self::with_options(source, settings.broker_cache_ttl, settings.broker_fetch_limit)
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    /// Brokers ordered by rating, highest first. An empty slice means the catalog could not be
    /// loaded, not that no brokers exist.
    pub async fn get_brokers(&self) -> Arc<[BrokerSnapshot]> {
        self.get_brokers_at(Utc::now()).await
    }

    pub async fn get_brokers_at(&self, now: DateTime<Utc>) -> Arc<[BrokerSnapshot]> {
        let mut guard = self.slot.lock().await;
        if let Some(cached) = guard.as_ref() {
            if self.is_fresh(cached.fetched_at, now) {
                return Arc::clone(&cached.brokers);
            }
        }

        match self.source.fetch_active_brokers(self.limit).await {
            Ok(mut brokers) => {
                // Remote sources may return rows unordered; replies rely on rating order.
                crate::source::sort_by_rating_desc(&mut brokers);
                tracing::info!(
                    source = self.source.source_name(),
                    brokers = brokers.len(),
                    "refreshed broker cache"
                );
                let brokers: Arc<[BrokerSnapshot]> = brokers.into();
                *guard = Some(CachedBrokers {
                    brokers: Arc::clone(&brokers),
                    fetched_at: now,
                });
                brokers
            }
            Err(err) => {
                // Failures are not cached; the next call tries again.
                tracing::error!(
                    source = self.source.source_name(),
                    error = %err,
                    "broker fetch failed"
                );
                Arc::from(Vec::new())
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            // Clock went backwards.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::StaticBrokerSource;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct CountingSource {
        pub(crate) inner: StaticBrokerSource,
        pub(crate) calls: AtomicUsize,
        pub(crate) fail: bool,
    }

    impl CountingSource {
        pub(crate) fn new(brokers: Vec<BrokerSnapshot>) -> Self {
            Self {
                inner: StaticBrokerSource::new(brokers),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait::async_trait]
    impl BrokerSource for CountingSource {
        fn source_name(&self) -> &'static str {
            "counting"
        }

        async fn fetch_active_brokers(&self, limit: i64) -> anyhow::Result<Vec<BrokerSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "connection refused");
            self.inner.fetch_active_brokers(limit).await
        }
    }

    fn catalog() -> Vec<BrokerSnapshot> {
        crate::source::demo::demo_catalog()
    }

    fn t(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs.into())
    }

    #[tokio::test]
    async fn second_call_within_ttl_returns_same_snapshot() {
        let source = Arc::new(CountingSource::new(catalog()));
        let cache = BrokerCache::new(source.clone());

        let a = cache.get_brokers_at(t(0)).await;
        let b = cache.get_brokers_at(t(299)).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_once_ttl_has_elapsed() {
        let source = Arc::new(CountingSource::new(catalog()));
        let cache = BrokerCache::new(source.clone());

        let a = cache.get_brokers_at(t(0)).await;
        let b = cache.get_brokers_at(t(300)).await;

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_yields_empty_and_is_not_cached() {
        let source = Arc::new(CountingSource::failing());
        let cache = BrokerCache::new(source.clone());

        assert!(cache.get_brokers_at(t(0)).await.is_empty());
        assert!(cache.get_brokers_at(t(1)).await.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn respects_fetch_limit_and_rating_order() {
        let source = Arc::new(CountingSource::new(catalog()));
        let cache = BrokerCache::with_options(source, DEFAULT_TTL, 2);

        let out = cache.get_brokers_at(t(0)).await;
        let names: Vec<&str> = out.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["IC Markets", "Pepperstone"]);
    }

    /// Returns its rows exactly as given, like a server that ignored the order parameter.
    struct UnorderedSource(Vec<BrokerSnapshot>);

    #[async_trait::async_trait]
    impl BrokerSource for UnorderedSource {
        fn source_name(&self) -> &'static str {
            "unordered"
        }

        async fn fetch_active_brokers(&self, _limit: i64) -> anyhow::Result<Vec<BrokerSnapshot>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn sorts_unordered_source_rows_by_rating() {
        let mut rows = catalog();
        rows.reverse();
        rows[2].rating = None;
        let unrated = rows[2].name.clone();
        let cache = BrokerCache::new(Arc::new(UnorderedSource(rows)));

        let out = cache.get_brokers_at(t(0)).await;
        let ratings: Vec<Option<f64>> = out.iter().map(|b| b.rating).collect();
        assert_eq!(
            ratings,
            vec![Some(4.8), Some(4.7), Some(4.6), Some(4.3), Some(3.9), None]
        );
        assert_eq!(out.last().unwrap().name, unrated);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let source = Arc::new(CountingSource::new(catalog()));
        let cache = BrokerCache::new(source.clone());

        cache.get_brokers_at(t(0)).await;
        cache.invalidate().await;
        cache.get_brokers_at(t(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
