use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{db_error, field_error, to_api_error, ApiResult};
use crate::{middleware::AuthUser, models::{Booking, Payment}, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings/payments", get(list_payments).post(create_payment))
        .route("/bookings/payments/{id}", get(get_payment))
        .route("/bookings/payments/{id}/process", post(process_payment))
}

// Платеж вместе с владельцем бронирования для проверки доступа
#[derive(Debug, sqlx::FromRow)]
struct PaymentWithOwner {
    #[sqlx(flatten)]
    payment: Payment,
    owner_id: i64,
}

/* ---------- ПЛАТЕЖИ ---------- */

// GET /api/bookings/payments
// Пользователи видят только свои платежи, админы - все
async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let payments: Vec<Payment> = if user.is_admin() {
        sqlx::query_as("SELECT * FROM payments ORDER BY created_at DESC")
            .fetch_all(&state.db.pool)
            .await
    } else {
        sqlx::query_as(
            "SELECT p.*
             FROM payments p
             JOIN bookings b ON b.id = p.booking_id
             WHERE b.user_id = $1
             ORDER BY p.created_at DESC",
        )
        .bind(user.user_id)
        .fetch_all(&state.db.pool)
        .await
    }
    .map_err(|e| db_error("list_payments", e))?;

    Ok((StatusCode::OK, Json(payments)))
}

// POST /api/bookings/payments
#[derive(Debug, Deserialize)]
struct CreatePaymentRequest {
    booking_id: i64,
    payment_method: Option<String>,
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let payment_method = req.payment_method.unwrap_or_else(|| "card".to_string());
    if !matches!(payment_method.as_str(), "card" | "cash" | "transfer") {
        return Err(field_error(
            "payment_method",
            "Способ оплаты должен быть card | cash | transfer",
        ));
    }

    let booking: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(req.booking_id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| db_error("create_payment", e))?;

    let booking =
        booking.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Бронирование не найдено"))?;

    // Оплачивать можно только свои бронирования
    if !user.can_access(booking.user_id) {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Вы можете оплачивать только свои бронирования",
        ));
    }

    if booking.status == "cancelled" {
        return Err(field_error(
            "booking",
            "Отменённое бронирование не может быть оплачено",
        ));
    }

    // Повторная оплата не допускается
    let already_paid: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM payments WHERE booking_id = $1 AND status = 'paid')",
    )
    .bind(booking.id)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| db_error("create_payment", e))?;

    if already_paid {
        return Err(field_error("booking", "Бронирование уже оплачено"));
    }

    // Сумма всегда берётся из бронирования
    let payment: Payment = sqlx::query_as(
        "INSERT INTO payments (booking_id, amount, status, payment_method)
         VALUES ($1, $2, 'pending', $3)
         RETURNING *",
    )
    .bind(booking.id)
    .bind(booking.total_price)
    .bind(&payment_method)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| db_error("create_payment", e))?;

    tracing::info!(
        "Payment created: id={}, booking={}, amount={}",
        payment.id,
        payment.booking_id,
        payment.amount
    );

    Ok((StatusCode::CREATED, Json(payment)))
}

// GET /api/bookings/payments/{id}
async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row: Option<PaymentWithOwner> = sqlx::query_as(
        "SELECT p.*, b.user_id AS owner_id
         FROM payments p
         JOIN bookings b ON b.id = p.booking_id
         WHERE p.id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| db_error("get_payment", e))?;

    let row = row.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Платеж не найден"))?;

    if !user.can_access(row.owner_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    Ok((StatusCode::OK, Json(row.payment)))
}

// POST /api/bookings/payments/{id}/process
//
// Имитация оплаты: платеж переводится в 'paid', и если бронирование ещё
// ожидает подтверждения - подтверждается. Оба обновления коммитятся вместе
// или не коммитятся вовсе. Строка платежа блокируется, чтобы два
// одновременных запроса не обработали один платеж дважды.
async fn process_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("process_payment", e))?;

    let row: Option<PaymentWithOwner> = sqlx::query_as(
        "SELECT p.*, b.user_id AS owner_id
         FROM payments p
         JOIN bookings b ON b.id = p.booking_id
         WHERE p.id = $1
         FOR UPDATE OF p",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| db_error("process_payment", e))?;

    let row = row.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Платеж не найден"))?;

    if !user.can_access(row.owner_id) {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Нет прав для обработки этого платежа",
        ));
    }

    if row.payment.status == "paid" {
        return Err(to_api_error(StatusCode::BAD_REQUEST, "Платеж уже оплачен"));
    }

    let payment: Payment =
        sqlx::query_as("UPDATE payments SET status = 'paid' WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("process_payment", e))?;

    // Автоматически подтверждаем бронирование после оплаты
    sqlx::query("UPDATE bookings SET status = 'confirmed' WHERE id = $1 AND status = 'pending'")
        .bind(payment.booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("process_payment", e))?;

    tx.commit()
        .await
        .map_err(|e| db_error("process_payment", e))?;

    tracing::info!(
        "Payment processed: id={}, booking={}, amount={}",
        payment.id,
        payment.booking_id,
        payment.amount
    );

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Платеж успешно обработан",
            "payment": payment
        })),
    ))
}
