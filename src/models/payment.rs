use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Платеж за бронирование. Имитация шлюза: только переключение статуса
// pending -> paid | failed, без реального списания средств.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub booking_id: i64,
    pub amount: f64,
    pub status: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}
