pub mod users;
pub mod venues;
pub mod bookings;
pub mod payments;
pub mod reviews;

use axum::{http::StatusCode, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::services::booking_validator::ValidatorError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(users::routes())
        .merge(venues::routes())
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(reviews::routes())
}

/* ---------- общие типы ответов ---------- */

pub type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

pub(crate) fn to_api_error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "message": message })))
}

// Ошибка валидации, привязанная к полю запроса: 400 {"errors": {field: msg}}
pub(crate) fn field_error(field: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "errors": { field: message } })),
    )
}

pub(crate) fn db_error(context: &str, e: sqlx::Error) -> (StatusCode, Json<Value>) {
    tracing::error!("{} sql error: {:?}", context, e);
    to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных")
}

// Ошибки derive-валидации DTO сводим к той же форме field -> message
pub(crate) fn validation_errors(e: &validator::ValidationErrors) -> (StatusCode, Json<Value>) {
    let mut errors = serde_json::Map::new();
    for (field, field_errors) in e.field_errors() {
        let message = field_errors
            .first()
            .and_then(|err| err.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "Некорректное значение".to_string());
        errors.insert(field.to_string(), Value::String(message));
    }
    (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors })))
}

// Исход валидатора бронирований -> HTTP-ответ
pub(crate) fn validator_error(e: ValidatorError) -> (StatusCode, Json<Value>) {
    match e {
        ValidatorError::VenueNotFound => {
            to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена")
        }
        ValidatorError::Invalid(v) => field_error(v.field(), &v.to_string()),
        ValidatorError::Database(e) => db_error("booking validation", e),
    }
}
