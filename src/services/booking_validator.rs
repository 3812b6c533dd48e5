//! booking_validator.rs
//!
//! Валидатор бронирований и проверка доступности площадки.
//!
//! Проверки выполняются строго по порядку, возвращается первая нарушенная
//! (политика "first violation wins"):
//! 1. Конец аренды строго позже начала.
//! 2. Длительность в пределах min/max (по умолчанию 1-24 часа).
//! 3. Начало не в прошлом и не дальше max_advance_days от текущего момента.
//! 4. Площадка активна.
//! 5. Нет пересечения с другой бронью площадки в статусе pending/confirmed;
//!    интервалы полуоткрытые [start, end), при обновлении своя бронь
//!    исключается по id.
//!
//! Гонку двух одновременных запросов закрывает `validate_booking`: первая
//! операция в транзакции - `SELECT ... FOR UPDATE` строки площадки, поэтому
//! проверка пересечений и вставка сериализуются по площадке.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;

/// Настраиваемые правила бронирования (секция [booking] конфигурации).
#[derive(Debug, Clone, Copy)]
pub struct BookingRules {
    pub min_duration_hours: f64,
    pub max_duration_hours: f64,
    pub max_advance_days: i64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_duration_hours: 1.0,
            max_duration_hours: 24.0,
            max_advance_days: 90,
        }
    }
}

/// Нарушение одного из правил бронирования. Каждому варианту соответствует
/// поле запроса, к которому привязывается ошибка в HTTP-ответе.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookingValidationError {
    #[error("Дата окончания должна быть после даты начала")]
    EndNotAfterStart,
    #[error("Минимальная длительность бронирования - {0} ч.")]
    DurationTooShort(f64),
    #[error("Максимальная длительность бронирования - {0} ч.")]
    DurationTooLong(f64),
    #[error("Дата начала не может быть в прошлом")]
    StartInPast,
    #[error("Бронировать можно не более чем за {0} дней")]
    TooFarInAdvance(i64),
    #[error("Площадка недоступна для бронирования")]
    VenueInactive,
    #[error("Площадка недоступна на выбранное время")]
    SlotTaken,
}

impl BookingValidationError {
    /// Поле запроса, к которому относится нарушение.
    pub fn field(&self) -> &'static str {
        match self {
            Self::EndNotAfterStart | Self::DurationTooShort(_) | Self::DurationTooLong(_) => {
                "date_end"
            }
            Self::StartInPast | Self::TooFarInAdvance(_) => "date_start",
            Self::VenueInactive | Self::SlotTaken => "venue",
        }
    }
}

/// Ошибка полной проверки: нарушение правил, отсутствующая площадка или БД.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("Площадка не найдена")]
    VenueNotFound,
    #[error(transparent)]
    Invalid(#[from] BookingValidationError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Длительность интервала в часах (дробная).
pub fn duration_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

/// Стоимость аренды: часы * цена за час, округление до 2 знаков.
/// Цена производная - клиентом не задаётся и не валидируется.
pub fn total_price(start: DateTime<Utc>, end: DateTime<Utc>, price_per_hour: f64) -> f64 {
    (duration_hours(start, end) * price_per_hour * 100.0).round() / 100.0
}

/// Пересечение полуоткрытых интервалов [a_start, a_end) и [b_start, b_end).
/// Стыковка впритык (a_end == b_start) пересечением не считается.
pub fn ranges_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Чистые проверки 1-3: порядок дат, длительность, горизонт бронирования.
pub fn validate_time_range(
    rules: &BookingRules,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), BookingValidationError> {
    if end <= start {
        return Err(BookingValidationError::EndNotAfterStart);
    }

    let hours = duration_hours(start, end);
    if hours < rules.min_duration_hours {
        return Err(BookingValidationError::DurationTooShort(
            rules.min_duration_hours,
        ));
    }
    if hours > rules.max_duration_hours {
        return Err(BookingValidationError::DurationTooLong(
            rules.max_duration_hours,
        ));
    }

    if start < now {
        return Err(BookingValidationError::StartInPast);
    }
    if start > now + Duration::days(rules.max_advance_days) {
        return Err(BookingValidationError::TooFarInAdvance(
            rules.max_advance_days,
        ));
    }

    Ok(())
}

/// Занятый слот существующей брони площадки.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BookedSlot {
    pub id: i64,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
}

/// Конфликтует ли интервал [start, end) с существующими бронями.
/// `exclude_booking_id` пропускает собственную бронь при обновлении.
pub fn has_conflict(
    existing: &[BookedSlot],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude_booking_id: Option<i64>,
) -> bool {
    existing
        .iter()
        .filter(|slot| Some(slot.id) != exclude_booking_id)
        .any(|slot| ranges_overlap(slot.date_start, slot.date_end, start, end))
}

/// Проверка 5: загружает активные (pending/confirmed) брони площадки
/// и применяет `has_conflict`. Возвращает true, если слот свободен.
pub async fn check_availability<'e, E>(
    executor: E,
    venue_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude_booking_id: Option<i64>,
) -> sqlx::Result<bool>
where
    E: sqlx::PgExecutor<'e>,
{
    // Брони, закончившиеся до начала интервала, конфликтовать не могут
    let existing: Vec<BookedSlot> = sqlx::query_as(
        "SELECT id, date_start, date_end
         FROM bookings
         WHERE venue_id = $1 AND status IN ('pending', 'confirmed') AND date_end > $2",
    )
    .bind(venue_id)
    .bind(start)
    .fetch_all(executor)
    .await?;

    Ok(!has_conflict(&existing, start, end, exclude_booking_id))
}

/// Строка площадки, заблокированная на время транзакции бронирования.
#[derive(Debug, Clone, FromRow)]
pub struct LockedVenue {
    pub id: i64,
    pub price_per_hour: f64,
    pub is_active: bool,
}

/// Полная проверка допустимости брони внутри транзакции вызывающего.
///
/// Сначала берётся блокировка строки площадки (FOR UPDATE): два
/// одновременных запроса на одну площадку выполняются по очереди, и второй
/// видит бронь первого. Затем проверки 1-5 в описанном выше порядке.
pub async fn validate_booking(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    rules: &BookingRules,
    venue_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude_booking_id: Option<i64>,
) -> Result<LockedVenue, ValidatorError> {
    let venue: Option<LockedVenue> = sqlx::query_as(
        "SELECT id, price_per_hour, is_active FROM venues WHERE id = $1 FOR UPDATE",
    )
    .bind(venue_id)
    .fetch_optional(&mut **tx)
    .await?;

    let venue = venue.ok_or(ValidatorError::VenueNotFound)?;

    validate_time_range(rules, Utc::now(), start, end)?;

    if !venue.is_active {
        return Err(BookingValidationError::VenueInactive.into());
    }

    if !check_availability(&mut **tx, venue_id, start, end, exclude_booking_id).await? {
        return Err(BookingValidationError::SlotTaken.into());
    }

    Ok(venue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, h, m, 0).unwrap()
    }

    fn rules() -> BookingRules {
        BookingRules::default()
    }

    // now = 08:00, брони в тот же день
    fn now() -> DateTime<Utc> {
        at(8, 0)
    }

    #[test]
    fn end_must_be_after_start() {
        let err = validate_time_range(&rules(), now(), at(12, 0), at(10, 0)).unwrap_err();
        assert_eq!(err, BookingValidationError::EndNotAfterStart);
        assert_eq!(err.field(), "date_end");

        let err = validate_time_range(&rules(), now(), at(12, 0), at(12, 0)).unwrap_err();
        assert_eq!(err, BookingValidationError::EndNotAfterStart);
    }

    #[test]
    fn duration_at_minimum_boundary_is_accepted() {
        // Ровно 1 час - проходит
        assert!(validate_time_range(&rules(), now(), at(10, 0), at(11, 0)).is_ok());
        // На минуту меньше - отказ
        let err = validate_time_range(&rules(), now(), at(10, 0), at(10, 59)).unwrap_err();
        assert_eq!(err, BookingValidationError::DurationTooShort(1.0));
        assert_eq!(err.field(), "date_end");
    }

    #[test]
    fn duration_at_maximum_boundary_is_accepted() {
        let start = at(10, 0);
        // Ровно 24 часа - проходит
        assert!(validate_time_range(&rules(), now(), start, start + Duration::hours(24)).is_ok());
        // На минуту больше - отказ
        let err = validate_time_range(
            &rules(),
            now(),
            start,
            start + Duration::hours(24) + Duration::minutes(1),
        )
        .unwrap_err();
        assert_eq!(err, BookingValidationError::DurationTooLong(24.0));
    }

    #[test]
    fn start_in_past_is_rejected() {
        // now = 08:00, старт в 06:00
        let err = validate_time_range(&rules(), now(), at(6, 0), at(9, 0)).unwrap_err();
        assert_eq!(err, BookingValidationError::StartInPast);
        assert_eq!(err.field(), "date_start");
    }

    #[test]
    fn start_beyond_advance_horizon_is_rejected() {
        let start = now() + Duration::days(91);
        let err = validate_time_range(&rules(), now(), start, start + Duration::hours(2))
            .unwrap_err();
        assert_eq!(err, BookingValidationError::TooFarInAdvance(90));
        assert_eq!(err.field(), "date_start");

        // Ровно 90 дней - ещё допустимо
        let start = now() + Duration::days(90);
        assert!(validate_time_range(&rules(), now(), start, start + Duration::hours(2)).is_ok());
    }

    #[test]
    fn violations_are_reported_in_check_order() {
        // Интервал одновременно "в прошлом" и короче минимума:
        // первым должно сработать правило длительности (проверка 2 раньше 3)
        let err = validate_time_range(&rules(), now(), at(5, 0), at(5, 30)).unwrap_err();
        assert_eq!(err, BookingValidationError::DurationTooShort(1.0));
    }

    #[test]
    fn total_price_for_fractional_hours() {
        // 2.5 часа * 1000 за час = 2500 (спека, дробный случай)
        assert_eq!(total_price(at(10, 0), at(12, 30), 1000.0), 2500.0);
        // Округление до копеек: 1.5 часа * 333.33
        assert_eq!(total_price(at(10, 0), at(11, 30), 333.33), 500.0);
        assert_eq!(total_price(at(10, 0), at(12, 0), 1000.0), 2000.0);
    }

    fn slot(id: i64, start_h: u32, end_h: u32) -> BookedSlot {
        BookedSlot {
            id,
            date_start: at(start_h, 0),
            date_end: at(end_h, 0),
        }
    }

    #[test]
    fn overlapping_range_conflicts() {
        // A = [10:00, 12:00), B = [11:00, 13:00) - конфликт (сценарий спеки)
        let existing = vec![slot(1, 10, 12)];
        assert!(has_conflict(&existing, at(11, 0), at(13, 0), None));
    }

    #[test]
    fn back_to_back_range_does_not_conflict() {
        // C = [12:00, 14:00) стыкуется с A = [10:00, 12:00) впритык
        let existing = vec![slot(1, 10, 12)];
        assert!(!has_conflict(&existing, at(12, 0), at(14, 0), None));
        // И с другой стороны: [08:00, 10:00)
        assert!(!has_conflict(&existing, at(8, 0), at(10, 0), None));
    }

    #[test]
    fn contained_and_containing_ranges_conflict() {
        let existing = vec![slot(1, 10, 14)];
        // Внутри существующей
        assert!(has_conflict(&existing, at(11, 0), at(12, 0), None));
        // Целиком накрывает существующую
        assert!(has_conflict(&existing, at(9, 0), at(15, 0), None));
    }

    #[test]
    fn excluding_own_id_keeps_own_slot() {
        // При обновлении бронь не конфликтует сама с собой
        let existing = vec![slot(7, 10, 12)];
        assert!(has_conflict(&existing, at(10, 0), at(12, 0), None));
        assert!(!has_conflict(&existing, at(10, 0), at(12, 0), Some(7)));
        // Но чужая бронь по-прежнему мешает
        let existing = vec![slot(7, 10, 12), slot(8, 12, 14)];
        assert!(has_conflict(&existing, at(10, 0), at(13, 0), Some(7)));
    }

    #[test]
    fn booking_scenario_from_two_hour_slots() {
        // Площадка 1000/час; A = [10:00, 12:00) confirmed
        let existing = vec![slot(1, 10, 12)];

        // B = [11:00, 13:00) - отказ по пересечению
        assert!(has_conflict(&existing, at(11, 0), at(13, 0), None));

        // C = [12:00, 14:00) - проходит, цена 2000
        assert!(!has_conflict(&existing, at(12, 0), at(14, 0), None));
        assert_eq!(total_price(at(12, 0), at(14, 0), 1000.0), 2000.0);
    }

    proptest! {
        // Пересечение симметрично относительно порядка интервалов
        #[test]
        fn overlap_is_symmetric(a in 0i64..96, b in 1i64..24, c in 0i64..96, d in 1i64..24) {
            let base = at(0, 0);
            let q = |x: i64| base + Duration::minutes(x * 15);
            let (a1, a2) = (q(a), q(a + b));
            let (b1, b2) = (q(c), q(c + d));
            prop_assert_eq!(
                ranges_overlap(a1, a2, b1, b2),
                ranges_overlap(b1, b2, a1, a2)
            );
        }

        // Стыковка end == start никогда не считается пересечением
        #[test]
        fn adjacent_intervals_never_overlap(a in 0i64..96, b in 1i64..24, c in 1i64..24) {
            let base = at(0, 0);
            let q = |x: i64| base + Duration::minutes(x * 15);
            prop_assert!(!ranges_overlap(q(a), q(a + b), q(a + b), q(a + b + c)));
        }
    }
}
