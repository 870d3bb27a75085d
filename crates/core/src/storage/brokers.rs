use crate::domain::broker::BrokerSnapshot;
use anyhow::Context;

const UPSERT_BATCH: usize = 100;

/// Inserts or refreshes brokers keyed by name, marking them active. Returns affected rows.
pub async fn upsert_brokers(pool: &sqlx::PgPool, brokers: &[BrokerSnapshot]) -> anyhow::Result<u64> {
    anyhow::ensure!(!brokers.is_empty(), "brokers must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for (batch_idx, chunk) in brokers.chunks(UPSERT_BATCH).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO brokers (name, country, overall_rating, min_deposit, avg_spread, \
             max_leverage, trading_platforms, regulations, is_active) ",
        );
        qb.push_values(chunk, |mut b, broker| {
            b.push_bind(broker.name.trim())
                .push_bind(broker.country.as_deref())
                .push_bind(broker.rating)
                .push_bind(broker.min_deposit)
                .push_bind(broker.avg_spread)
                .push_bind(broker.max_leverage.as_deref())
                .push_bind(broker.platforms.clone())
                .push_bind(broker.regulations.clone())
                .push_bind(true);
        });
        qb.push(
            " ON CONFLICT (name) DO UPDATE \
               SET country = EXCLUDED.country, overall_rating = EXCLUDED.overall_rating, \
                   min_deposit = EXCLUDED.min_deposit, avg_spread = EXCLUDED.avg_spread, \
                   max_leverage = EXCLUDED.max_leverage, trading_platforms = EXCLUDED.trading_platforms, \
                   regulations = EXCLUDED.regulations, is_active = TRUE, updated_at = now()",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert brokers failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "brokers batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

pub async fn count_active_brokers(pool: &sqlx::PgPool) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM brokers WHERE is_active")
        .persistent(false)
        .fetch_one(pool)
        .await
        .context("count brokers failed")?;
    Ok(count)
}
