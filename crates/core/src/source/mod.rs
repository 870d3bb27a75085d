use crate::config::{Settings, SourceKind};
use crate::domain::broker::BrokerSnapshot;
use std::sync::Arc;

pub mod demo;
pub mod postgres;
pub mod supabase;

/// Where the chat responder reads the broker catalog from.
#[async_trait::async_trait]
pub trait BrokerSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Active brokers ordered by rating (highest first, unrated last), at most `limit` rows.
    async fn fetch_active_brokers(&self, limit: i64) -> anyhow::Result<Vec<BrokerSnapshot>>;
}

/// Fixed in-memory catalog. Applies the same active/order/limit contract as the remote sources.
#[derive(Debug, Clone, Default)]
pub struct StaticBrokerSource {
    brokers: Vec<BrokerSnapshot>,
}

impl StaticBrokerSource {
    pub fn new(brokers: Vec<BrokerSnapshot>) -> Self {
        Self { brokers }
    }
}

#[async_trait::async_trait]
impl BrokerSource for StaticBrokerSource {
    fn source_name(&self) -> &'static str {
        "static"
    }

    async fn fetch_active_brokers(&self, limit: i64) -> anyhow::Result<Vec<BrokerSnapshot>> {
        let mut out = self.brokers.clone();
        sort_by_rating_desc(&mut out);
        out.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(out)
    }
}

pub fn sort_by_rating_desc(brokers: &mut [BrokerSnapshot]) {
    brokers.sort_by(|a, b| match (a.rating, b.rating) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Builds the source selected by configuration. Postgres connects lazily so a down database
/// surfaces as fetch failures rather than a startup error.
pub fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn BrokerSource>> {
    match settings.source_kind()? {
        SourceKind::Postgres => {
            let pool = postgres::connect_lazy(settings.require_database_url()?)?;
            Ok(Arc::new(postgres::PgBrokerSource::new(pool)))
        }
        SourceKind::Supabase => Ok(Arc::new(supabase::SupabaseBrokerSource::from_settings(
            settings,
        )?)),
    }
}
