//! bookings.rs
//!
//! HTTP-слой бронирований. Создание и перенос брони проходят через
//! `services::booking_validator`: блокировка строки площадки (FOR UPDATE),
//! затем проверки правил и пересечений - всё в одной транзакции со вставкой,
//! чтобы два параллельных запроса не прошли проверку одновременно.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{db_error, to_api_error, validator_error, ApiResult};
use crate::{
    middleware::AuthUser,
    models::Booking,
    services::booking_validator::{self, total_price},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/occupied-slots", get(occupied_slots))
        .route("/bookings/{id}", get(get_booking).patch(reschedule_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/confirm", post(confirm_booking))
}

/* ---------- ОТОБРАЖЕНИЕ ---------- */

// Бронь с данными для выдачи: название площадки, имя арендатора,
// есть ли уже отзыв
#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    #[sqlx(flatten)]
    booking: Booking,
    venue_title: String,
    user_name: String,
    has_review: bool,
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    #[serde(flatten)]
    booking: Booking,
    venue_title: String,
    user_name: String,
    has_review: bool,
    can_be_cancelled: bool,
}

impl BookingRow {
    fn into_response(self, now: DateTime<Utc>) -> BookingResponse {
        let can_be_cancelled = self.booking.can_be_cancelled(now);
        BookingResponse {
            booking: self.booking,
            venue_title: self.venue_title,
            user_name: self.user_name,
            has_review: self.has_review,
            can_be_cancelled,
        }
    }
}

const BOOKING_ROW_SQL: &str = "SELECT b.id, b.user_id, b.venue_id, b.date_start, b.date_end,
            b.status, b.total_price, b.created_at,
            v.title AS venue_title, u.full_name AS user_name,
            EXISTS(SELECT 1 FROM reviews r WHERE r.booking_id = b.id) AS has_review
     FROM bookings b
     JOIN venues v ON v.id = b.venue_id
     JOIN users u ON u.user_id = b.user_id";

async fn fetch_booking_row(
    pool: &sqlx::PgPool,
    booking_id: i64,
) -> sqlx::Result<Option<BookingRow>> {
    sqlx::query_as(&format!("{} WHERE b.id = $1", BOOKING_ROW_SQL))
        .bind(booking_id)
        .fetch_optional(pool)
        .await
}

/* ---------- БРОНИРОВАНИЯ ---------- */

// GET /api/bookings
// Пользователи видят только свои бронирования, админы - все
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let rows: Vec<BookingRow> = if user.is_admin() {
        sqlx::query_as(&format!("{} ORDER BY b.created_at DESC", BOOKING_ROW_SQL))
            .fetch_all(&state.db.pool)
            .await
    } else {
        sqlx::query_as(&format!(
            "{} WHERE b.user_id = $1 ORDER BY b.created_at DESC",
            BOOKING_ROW_SQL
        ))
        .bind(user.user_id)
        .fetch_all(&state.db.pool)
        .await
    }
    .map_err(|e| db_error("list_bookings", e))?;

    let now = Utc::now();
    let bookings: Vec<BookingResponse> = rows.into_iter().map(|r| r.into_response(now)).collect();

    Ok((StatusCode::OK, Json(bookings)))
}

// POST /api/bookings
#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    venue: i64,
    date_start: DateTime<Utc>,
    date_end: DateTime<Utc>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    // Лимит на создание бронирований
    if state.config.features.enable_rate_limiting
        && state
            .cache
            .hit_rate_limit(
                "booking",
                user.user_id,
                state.config.throttle.bookings_per_hour,
                3600,
            )
            .await
    {
        return Err(to_api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Слишком много бронирований. Попробуйте позже.",
        ));
    }

    let rules = state.config.booking_rules();

    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("create_booking", e))?;

    // Блокировка площадки + проверки 1-5; гонка двух заявок исключена,
    // пока транзакция не завершится
    let venue = booking_validator::validate_booking(
        &mut tx,
        &rules,
        req.venue,
        req.date_start,
        req.date_end,
        None,
    )
    .await
    .map_err(validator_error)?;

    // Цена производная: часы * цена за час на момент создания
    let price = total_price(req.date_start, req.date_end, venue.price_per_hour);

    let booking_id: i64 = sqlx::query_scalar(
        "INSERT INTO bookings (user_id, venue_id, date_start, date_end, status, total_price)
         VALUES ($1, $2, $3, $4, 'pending', $5)
         RETURNING id",
    )
    .bind(user.user_id)
    .bind(req.venue)
    .bind(req.date_start)
    .bind(req.date_end)
    .bind(price)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| db_error("create_booking", e))?;

    tx.commit().await.map_err(|e| db_error("create_booking", e))?;

    tracing::info!(
        "Booking created: id={}, venue={}, user={}, price={}",
        booking_id,
        req.venue,
        user.user_id,
        price
    );

    let row = fetch_booking_row(&state.db.pool, booking_id)
        .await
        .map_err(|e| db_error("create_booking", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))?;

    Ok((StatusCode::CREATED, Json(row.into_response(Utc::now()))))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = fetch_booking_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("get_booking", e))?
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено"))?;

    if !user.can_access(row.booking.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    Ok((StatusCode::OK, Json(row.into_response(Utc::now()))))
}

// PATCH /api/bookings/{id} - перенос брони на другое время.
// Свой id исключается из проверки пересечений, цена пересчитывается.
#[derive(Debug, Deserialize)]
struct RescheduleBookingRequest {
    date_start: DateTime<Utc>,
    date_end: DateTime<Utc>,
}

async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<RescheduleBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    let rules = state.config.booking_rules();

    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("reschedule_booking", e))?;

    let booking: Option<Booking> =
        sqlx::query_as("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("reschedule_booking", e))?;

    let booking =
        booking.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено"))?;

    if !user.can_access(booking.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }
    if booking.status != "pending" {
        return Err(to_api_error(
            StatusCode::BAD_REQUEST,
            "Перенести можно только бронирование в статусе \"Ожидает подтверждения\"",
        ));
    }

    let venue = booking_validator::validate_booking(
        &mut tx,
        &rules,
        booking.venue_id,
        req.date_start,
        req.date_end,
        Some(booking.id),
    )
    .await
    .map_err(validator_error)?;

    let price = total_price(req.date_start, req.date_end, venue.price_per_hour);

    sqlx::query(
        "UPDATE bookings SET date_start = $2, date_end = $3, total_price = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(req.date_start)
    .bind(req.date_end)
    .bind(price)
    .execute(&mut *tx)
    .await
    .map_err(|e| db_error("reschedule_booking", e))?;

    tx.commit()
        .await
        .map_err(|e| db_error("reschedule_booking", e))?;

    tracing::info!("Booking rescheduled: id={}, user={}", id, user.user_id);

    let row = fetch_booking_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("reschedule_booking", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))?;

    Ok((StatusCode::OK, Json(row.into_response(Utc::now()))))
}

// POST /api/bookings/{id}/cancel
// Вместе с бронью отменяются её неоплаченные платежи - одной транзакцией
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("cancel_booking", e))?;

    let booking: Option<Booking> =
        sqlx::query_as("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("cancel_booking", e))?;

    let booking =
        booking.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено"))?;

    if !user.can_access(booking.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    // Прошедшие и уже отменённые брони отменять нельзя
    if !booking.can_be_cancelled(Utc::now()) {
        return Err(to_api_error(
            StatusCode::BAD_REQUEST,
            "Это бронирование не может быть отменено",
        ));
    }

    sqlx::query("UPDATE bookings SET status = 'cancelled' WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("cancel_booking", e))?;

    sqlx::query("UPDATE payments SET status = 'failed' WHERE booking_id = $1 AND status = 'pending'")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("cancel_booking", e))?;

    tx.commit().await.map_err(|e| db_error("cancel_booking", e))?;

    tracing::info!("Booking cancelled: id={}, by user={}", id, user.user_id);

    let row = fetch_booking_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("cancel_booking", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))?;

    Ok((StatusCode::OK, Json(row.into_response(Utc::now()))))
}

// POST /api/bookings/{id}/confirm (только для администраторов)
async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Только администратор может подтверждать бронирования",
        ));
    }

    let confirmed: Option<i64> = sqlx::query_scalar(
        "UPDATE bookings SET status = 'confirmed' WHERE id = $1 AND status = 'pending' RETURNING id",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| db_error("confirm_booking", e))?;

    if confirmed.is_none() {
        // Различаем отсутствующую бронь и недопустимый статус
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM bookings WHERE id = $1)")
                .bind(id)
                .fetch_one(&state.db.pool)
                .await
                .map_err(|e| db_error("confirm_booking", e))?;

        return Err(if exists {
            to_api_error(
                StatusCode::BAD_REQUEST,
                "Можно подтверждать только бронирования в статусе \"Ожидает подтверждения\"",
            )
        } else {
            to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено")
        });
    }

    tracing::info!("Booking confirmed: id={}, by admin={}", id, user.user_id);

    let row = fetch_booking_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("confirm_booking", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))?;

    Ok((StatusCode::OK, Json(row.into_response(Utc::now()))))
}

/* ---------- ЗАНЯТЫЕ СЛОТЫ ---------- */

// GET /api/bookings/occupied-slots?venue=..&date=YYYY-MM-DD
// Публичный: занятые интервалы площадки на дату, без отменённых броней
#[derive(Debug, Deserialize)]
struct OccupiedSlotsQuery {
    venue: i64,
    date: String,
}

async fn occupied_slots(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OccupiedSlotsQuery>,
) -> ApiResult<impl IntoResponse> {
    let date = NaiveDate::parse_from_str(&params.date, "%Y-%m-%d").map_err(|_| {
        to_api_error(
            StatusCode::BAD_REQUEST,
            "Неверный формат даты. Используйте YYYY-MM-DD",
        )
    })?;

    let slots: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        "SELECT date_start, date_end
         FROM bookings
         WHERE venue_id = $1
           AND status != 'cancelled'
           AND (date_start AT TIME ZONE 'Europe/Moscow')::date = $2
         ORDER BY date_start",
    )
    .bind(params.venue)
    .bind(date)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| db_error("occupied_slots", e))?;

    // Слоты в формате "HH:MM - HH:MM" в локальном времени (UTC+3 Москва)
    let local_tz = FixedOffset::east_opt(3 * 3600).unwrap();
    let occupied_slots: Vec<String> = slots
        .into_iter()
        .map(|(start, end)| {
            format!(
                "{} - {}",
                start.with_timezone(&local_tz).format("%H:%M"),
                end.with_timezone(&local_tz).format("%H:%M")
            )
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "date": params.date,
            "venue": params.venue,
            "occupied_slots": occupied_slots
        })),
    ))
}
