use crate::domain::broker::{
    snapshots_from_rows, BrokerRow, BrokerSnapshot, IdField, ListField, NumberField, TextField,
};
use crate::source::BrokerSource;
use anyhow::Context;

type BrokerRecord = (
    String,
    String,
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<String>,
    Vec<String>,
    Vec<String>,
);

#[derive(Debug, Clone)]
pub struct PgBrokerSource {
    pool: sqlx::PgPool,
}

impl PgBrokerSource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

pub fn connect_lazy(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(database_url)
        .context("invalid DATABASE_URL")
}

#[async_trait::async_trait]
impl BrokerSource for PgBrokerSource {
    fn source_name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_active_brokers(&self, limit: i64) -> anyhow::Result<Vec<BrokerSnapshot>> {
        let t0 = std::time::Instant::now();
        let rows = sqlx::query_as::<_, BrokerRecord>(
            "SELECT id::text, name, country, overall_rating, min_deposit, avg_spread, \
                    max_leverage, trading_platforms, regulations \
             FROM brokers \
             WHERE is_active \
             ORDER BY overall_rating DESC NULLS LAST, name ASC \
             LIMIT $1",
        )
        .persistent(false)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("select brokers failed")?;

        tracing::debug!(
            rows = rows.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "fetched brokers from postgres"
        );

        Ok(snapshots_from_rows(rows.into_iter().map(record_to_row).collect()))
    }
}

fn record_to_row(record: BrokerRecord) -> BrokerRow {
    let (id, name, country, rating, min_deposit, avg_spread, max_leverage, platforms, regulations) =
        record;
    BrokerRow {
        id: Some(IdField::Text(id)),
        name: Some(name),
        country,
        overall_rating: rating.map(NumberField::Number),
        min_deposit: min_deposit.map(NumberField::Number),
        avg_spread: avg_spread.map(NumberField::Number),
        max_leverage: max_leverage.map(TextField::Text),
        trading_platforms: Some(ListField::List(platforms)),
        regulations: Some(ListField::List(regulations)),
        is_active: Some(true),
        ..BrokerRow::default()
    }
}
