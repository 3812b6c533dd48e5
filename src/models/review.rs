use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Отзыв о площадке. Один отзыв на бронирование; в выдачу и в рейтинг
// попадают только одобренные модератором (is_approved).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub user_id: i64,
    pub venue_id: i64,
    pub booking_id: i64,
    pub rating: i16,
    pub comment: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}
