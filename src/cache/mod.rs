use crate::{config::CacheTtlConfig, database::Database, redis_client::RedisClient};
use tracing::info;

pub mod ratings;
pub mod throttle;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
    ttl: CacheTtlConfig,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database, ttl: CacheTtlConfig) -> Self {
        Self { redis, db, ttl }
    }

    // Прогрев кеша при старте: рейтинги всех активных площадок
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        let venue_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM venues WHERE is_active = TRUE")
                .fetch_all(&self.db.pool)
                .await
                .unwrap_or_default();

        for venue_id in &venue_ids {
            let _ = self.get_venue_rating(*venue_id).await;
        }

        info!("Cache warmup done, {} venues", venue_ids.len());
    }
}
