use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

// Площадка для проведения мероприятий
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Venue {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub capacity: i32,
    pub price_per_hour: f64,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// Фотография площадки с набором thumbnails (JPEG + WebP)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VenueImage {
    pub id: i64,
    pub venue_id: i64,
    pub image: String,
    pub thumbnail_small: Option<String>,
    pub thumbnail_medium: Option<String>,
    pub thumbnail_large: Option<String>,
    pub thumbnail_small_webp: Option<String>,
    pub thumbnail_medium_webp: Option<String>,
    pub thumbnail_large_webp: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}
