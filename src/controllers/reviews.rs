use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{db_error, field_error, to_api_error, ApiResult};
use crate::{
    middleware::AuthUser,
    models::{Booking, Review},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reviews", get(list_reviews))
        .route("/reviews/my", get(my_reviews))
        .route("/reviews/create", post(create_review))
        .route("/reviews/pending", get(pending_reviews))
        .route(
            "/reviews/{id}",
            get(get_review).patch(update_review).delete(delete_review),
        )
        .route("/reviews/{id}/approve", post(approve_review))
        .route("/reviews/{id}/disapprove", post(disapprove_review))
}

/* ---------- ОТОБРАЖЕНИЕ ---------- */

#[derive(Debug, sqlx::FromRow, Serialize)]
struct ReviewRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    review: Review,
    user_name: String,
    user_username: String,
    venue_title: String,
}

const REVIEW_ROW_SQL: &str = "SELECT r.id, r.user_id, r.venue_id, r.booking_id, r.rating, r.comment,
            r.is_approved, r.created_at,
            u.full_name AS user_name, u.username AS user_username,
            v.title AS venue_title
     FROM reviews r
     JOIN users u ON u.user_id = r.user_id
     JOIN venues v ON v.id = r.venue_id";

async fn fetch_review_row(pool: &sqlx::PgPool, id: i64) -> sqlx::Result<Option<ReviewRow>> {
    sqlx::query_as(&format!("{} WHERE r.id = $1", REVIEW_ROW_SQL))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/* ---------- ПУБЛИЧНЫЕ СПИСКИ ---------- */

// GET /api/reviews - одобренные отзывы, опционально по площадке и оценке
#[derive(Debug, Deserialize)]
struct ReviewsQuery {
    venue: Option<i64>,
    rating: Option<i16>,
}

async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReviewsQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut q = format!("{} WHERE r.is_approved = TRUE", REVIEW_ROW_SQL);
    let mut bind_idx = 1;
    if params.venue.is_some() {
        q.push_str(&format!(" AND r.venue_id = ${}", bind_idx));
        bind_idx += 1;
    }
    if params.rating.is_some() {
        q.push_str(&format!(" AND r.rating = ${}", bind_idx));
    }
    q.push_str(" ORDER BY r.created_at DESC");

    let mut dbq = sqlx::query_as::<_, ReviewRow>(&q);
    if let Some(venue) = params.venue {
        dbq = dbq.bind(venue);
    }
    if let Some(rating) = params.rating {
        dbq = dbq.bind(rating);
    }

    let reviews = dbq
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| db_error("list_reviews", e))?;

    Ok((StatusCode::OK, Json(reviews)))
}

// GET /api/reviews/my - отзывы текущего пользователя (включая неодобренные)
async fn my_reviews(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let reviews: Vec<ReviewRow> = sqlx::query_as(&format!(
        "{} WHERE r.user_id = $1 ORDER BY r.created_at DESC",
        REVIEW_ROW_SQL
    ))
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| db_error("my_reviews", e))?;

    Ok((StatusCode::OK, Json(reviews)))
}

/* ---------- СОЗДАНИЕ И ПРАВКА ---------- */

// POST /api/reviews/create
#[derive(Debug, Deserialize)]
struct CreateReviewRequest {
    booking: i64,
    rating: i16,
    #[serde(default)]
    comment: String,
}

async fn create_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    // Лимит на создание отзывов
    if state.config.features.enable_rate_limiting
        && state
            .cache
            .hit_rate_limit(
                "review",
                user.user_id,
                state.config.throttle.reviews_per_day,
                86400,
            )
            .await
    {
        return Err(to_api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Слишком много отзывов. Попробуйте позже.",
        ));
    }

    if !(1..=5).contains(&req.rating) {
        return Err(field_error("rating", "Оценка должна быть от 1 до 5"));
    }

    let booking: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(req.booking)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| db_error("create_review", e))?;

    let booking =
        booking.ok_or_else(|| field_error("booking", "Бронирование не найдено"))?;

    // Отзыв только на своё и уже завершённое бронирование
    if booking.user_id != user.user_id {
        return Err(field_error("booking", "Это не ваше бронирование"));
    }
    if !booking.is_past(Utc::now()) {
        return Err(field_error(
            "booking",
            "Вы можете оставить отзыв только после завершения бронирования",
        ));
    }

    // Площадка берётся из бронирования; один отзыв на бронь обеспечивает
    // и проверка, и UNIQUE(booking_id) в БД
    let review: Result<Review, sqlx::Error> = sqlx::query_as(
        "INSERT INTO reviews (user_id, venue_id, booking_id, rating, comment, is_approved)
         VALUES ($1, $2, $3, $4, $5, FALSE)
         RETURNING *",
    )
    .bind(user.user_id)
    .bind(booking.venue_id)
    .bind(booking.id)
    .bind(req.rating)
    .bind(&req.comment)
    .fetch_one(&state.db.pool)
    .await;

    match review {
        Ok(review) => {
            tracing::info!(
                "Review created: id={}, venue={}, booking={}, rating={}",
                review.id,
                review.venue_id,
                review.booking_id,
                review.rating
            );
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "Отзыв успешно создан и отправлен на модерацию",
                    "review": review
                })),
            ))
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(field_error(
            "booking",
            "Вы уже оставляли отзыв для этого бронирования",
        )),
        Err(e) => Err(db_error("create_review", e)),
    }
}

// GET /api/reviews/{id}
async fn get_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = fetch_review_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("get_review", e))?
        .ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Отзыв не найден"))?;

    if !user.can_access(row.review.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    Ok((StatusCode::OK, Json(row)))
}

// PATCH /api/reviews/{id}
// При редактировании одобрение сбрасывается - отзыв снова уходит на модерацию
#[derive(Debug, Deserialize)]
struct UpdateReviewRequest {
    rating: Option<i16>,
    comment: Option<String>,
}

async fn update_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(rating) = req.rating {
        if !(1..=5).contains(&rating) {
            return Err(field_error("rating", "Оценка должна быть от 1 до 5"));
        }
    }

    let review: Option<Review> = sqlx::query_as("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| db_error("update_review", e))?;

    let review = review.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Отзыв не найден"))?;

    if !user.can_access(review.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    sqlx::query(
        "UPDATE reviews
         SET rating = COALESCE($2, rating),
             comment = COALESCE($3, comment),
             is_approved = FALSE
         WHERE id = $1",
    )
    .bind(id)
    .bind(req.rating)
    .bind(&req.comment)
    .execute(&state.db.pool)
    .await
    .map_err(|e| db_error("update_review", e))?;

    // Одобренный отзыв мог выпасть из агрегата
    state.cache.invalidate_venue_rating(review.venue_id).await;

    let row = fetch_review_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("update_review", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))?;

    Ok((StatusCode::OK, Json(row)))
}

// DELETE /api/reviews/{id}
async fn delete_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let review: Option<Review> = sqlx::query_as("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| db_error("delete_review", e))?;

    let review = review.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Отзыв не найден"))?;

    if !user.can_access(review.user_id) {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| db_error("delete_review", e))?;

    state.cache.invalidate_venue_rating(review.venue_id).await;

    Ok(StatusCode::NO_CONTENT)
}

/* ---------- МОДЕРАЦИЯ ---------- */

// GET /api/reviews/pending (только для администраторов)
async fn pending_reviews(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    let reviews: Vec<ReviewRow> = sqlx::query_as(&format!(
        "{} WHERE r.is_approved = FALSE ORDER BY r.created_at",
        REVIEW_ROW_SQL
    ))
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| db_error("pending_reviews", e))?;

    Ok((StatusCode::OK, Json(reviews)))
}

async fn set_approved(
    state: &AppState,
    user: &AuthUser,
    id: i64,
    approved: bool,
) -> ApiResult<ReviewRow> {
    if !user.is_admin() {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            if approved {
                "Только администратор может одобрять отзывы"
            } else {
                "Только администратор может отклонять отзывы"
            },
        ));
    }

    let venue_id: Option<i64> = sqlx::query_scalar(
        "UPDATE reviews SET is_approved = $2 WHERE id = $1 RETURNING venue_id",
    )
    .bind(id)
    .bind(approved)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| db_error("set_approved", e))?;

    let venue_id = venue_id.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Отзыв не найден"))?;

    // Агрегат рейтинга площадки изменился
    state.cache.invalidate_venue_rating(venue_id).await;

    tracing::info!(
        "Review moderated: id={}, approved={}, by admin={}",
        id,
        approved,
        user.user_id
    );

    fetch_review_row(&state.db.pool, id)
        .await
        .map_err(|e| db_error("set_approved", e))?
        .ok_or_else(|| to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка базы данных"))
}

// POST /api/reviews/{id}/approve (только для администраторов)
async fn approve_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = set_approved(&state, &user, id, true).await?;
    Ok((StatusCode::OK, Json(row)))
}

// POST /api/reviews/{id}/disapprove (только для администраторов)
async fn disapprove_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = set_approved(&state, &user, id, false).await?;
    Ok((StatusCode::OK, Json(row)))
}
