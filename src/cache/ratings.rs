use crate::cache::CacheService;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

// Кешируемый агрегат рейтинга площадки: среднее по одобренным отзывам
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueRating {
    pub average_rating: f64,
    pub reviews_count: i64,
}

fn rating_key(venue_id: i64) -> String {
    format!("venue:{}:rating_data", venue_id)
}

impl CacheService {
    /// Получает рейтинг и количество отзывов из кеша.
    /// Если не найдено - вычисляет по БД и кеширует.
    pub async fn get_venue_rating(&self, venue_id: i64) -> VenueRating {
        if let Ok(Some(rating)) = self.get_rating_from_cache(venue_id).await {
            debug!("Cache HIT: venue_id={}", venue_id);
            return rating;
        }

        debug!("Cache MISS: venue_id={}, calculating...", venue_id);
        match self.load_rating_from_db(venue_id).await {
            Ok(rating) => {
                let _ = self.save_rating_to_cache(venue_id, &rating).await;
                info!("Cached rating for venue_id={}: {:?}", venue_id, rating);
                rating
            }
            Err(e) => {
                error!("Error calculating rating for venue_id={}: {:?}", venue_id, e);
                VenueRating::default()
            }
        }
    }

    /// Инвалидирует кеш рейтинга при любом изменении множества одобренных
    /// отзывов площадки (approve/disapprove, правка, удаление, каскад).
    pub async fn invalidate_venue_rating(&self, venue_id: i64) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(rating_key(venue_id)).await;
        info!("Invalidated rating cache for venue {}", venue_id);
    }

    // === Работа с БД ===

    async fn load_rating_from_db(&self, venue_id: i64) -> Result<VenueRating, sqlx::Error> {
        let (avg, count): (Option<f64>, i64) = sqlx::query_as(
            "SELECT AVG(rating)::FLOAT8, COUNT(*)
             FROM reviews
             WHERE venue_id = $1 AND is_approved = TRUE",
        )
        .bind(venue_id)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(VenueRating {
            average_rating: avg.map(|a| (a * 100.0).round() / 100.0).unwrap_or(0.0),
            reviews_count: count,
        })
    }

    // === Работа с кешем ===

    async fn get_rating_from_cache(
        &self,
        venue_id: i64,
    ) -> Result<Option<VenueRating>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(rating_key(venue_id)).await?;
        Ok(data.and_then(|d| serde_json::from_str(&d).ok()))
    }

    async fn save_rating_to_cache(
        &self,
        venue_id: i64,
        rating: &VenueRating,
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(rating).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(rating_key(venue_id), data, self.ttl.venue_rating).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_key_format() {
        assert_eq!(rating_key(42), "venue:42:rating_data");
    }
}
