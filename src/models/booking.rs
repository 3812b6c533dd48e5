use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Бронирование площадки.
//
// Статусы: pending -> confirmed (подтверждение админом или успешная оплата),
// pending|confirmed -> cancelled (пока аренда не закончилась). Брони не
// удаляются физически - только каскадом вместе с площадкой/пользователем.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub venue_id: i64,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    pub status: String,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    // Аренда уже закончилась?
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.date_end < now
    }

    // Отменять можно только активную бронь, пока аренда не закончилась
    pub fn can_be_cancelled(&self, now: DateTime<Utc>) -> bool {
        (self.status == "pending" || self.status == "confirmed") && !self.is_past(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(status: &str, start_h: u32, end_h: u32) -> Booking {
        let day = |h| Utc.with_ymd_and_hms(2025, 6, 10, h, 0, 0).unwrap();
        Booking {
            id: 1,
            user_id: 1,
            venue_id: 1,
            date_start: day(start_h),
            date_end: day(end_h),
            status: status.to_string(),
            total_price: 0.0,
            created_at: day(0),
        }
    }

    #[test]
    fn pending_future_booking_can_be_cancelled() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap();
        assert!(booking("pending", 10, 12).can_be_cancelled(now));
        assert!(booking("confirmed", 10, 12).can_be_cancelled(now));
    }

    #[test]
    fn cancelled_booking_cannot_be_cancelled_again() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap();
        assert!(!booking("cancelled", 10, 12).can_be_cancelled(now));
    }

    #[test]
    fn past_booking_cannot_be_cancelled() {
        // Аренда закончилась в 12:00, сейчас 13:00
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 13, 0, 0).unwrap();
        assert!(!booking("pending", 10, 12).can_be_cancelled(now));
        assert!(!booking("confirmed", 10, 12).can_be_cancelled(now));
    }

    #[test]
    fn booking_in_progress_can_still_be_cancelled() {
        // Идёт прямо сейчас: date_end ещё не прошла
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 11, 0, 0).unwrap();
        assert!(booking("confirmed", 10, 12).can_be_cancelled(now));
    }
}
