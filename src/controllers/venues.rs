use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

use super::{db_error, field_error, to_api_error, validation_errors, ApiResult};
use crate::{
    middleware::AuthUser,
    models::{Category, Venue, VenueImage},
    services::thumbnails,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/venues", get(list_venues).post(create_venue))
        .route("/venues/categories", get(list_categories).post(create_category))
        .route(
            "/venues/{id}",
            get(get_venue).put(update_venue).delete(delete_venue),
        )
        // До 10 МБ на загружаемый файл
        .route(
            "/venues/{id}/images",
            post(upload_image).layer(axum::extract::DefaultBodyLimit::max(10 * 1024 * 1024)),
        )
        .route("/venues/{id}/images/{image_id}", axum::routing::delete(delete_image))
}

/* ---------- СПИСОК И ФИЛЬТРЫ ---------- */

#[derive(Debug, Deserialize)]
struct VenuesQuery {
    search: Option<String>,
    title: Option<String>,
    address: Option<String>,
    capacity_min: Option<i32>,
    capacity_max: Option<i32>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    category: Option<i64>,
    is_active: Option<bool>,
    ordering: Option<String>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

// Площадка вместе с агрегатом рейтинга (для списка считается прямо в SQL)
#[derive(Debug, sqlx::FromRow, Serialize)]
struct VenueWithRating {
    id: i64,
    owner_id: Option<i64>,
    title: String,
    description: String,
    capacity: i32,
    price_per_hour: f64,
    address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    is_active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    average_rating: Option<f64>,
    reviews_count: i64,
}

// Чистим пользовательский ввод перед plainto_tsquery
fn prepare_search_query(query: &str) -> String {
    query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// Сортировка только по известным колонкам
fn order_clause(ordering: Option<&str>) -> &'static str {
    match ordering.unwrap_or("-created_at") {
        "created_at" => "v.created_at",
        "price_per_hour" => "v.price_per_hour",
        "-price_per_hour" => "v.price_per_hour DESC",
        "capacity" => "v.capacity",
        "-capacity" => "v.capacity DESC",
        "title" => "v.title",
        _ => "v.created_at DESC",
    }
}

// GET /api/venues
async fn list_venues(
    State(state): State<Arc<AppState>>,
    user: Option<AuthUser>,
    Query(params): Query<VenuesQuery>,
) -> ApiResult<impl IntoResponse> {
    let is_admin = user.map(|u| u.is_admin()).unwrap_or(false);

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(12).clamp(1, 100);
    let offset = (page - 1) * page_size;

    // Динамический WHERE в стиле построения запроса по параметрам
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx = 1;

    // Не администраторам показываем только активные площадки
    if !is_admin {
        conditions.push("v.is_active = TRUE".to_string());
    } else if params.is_active.is_some() {
        conditions.push(format!("v.is_active = ${}", bind_idx));
        bind_idx += 1;
    }
    if params.search.is_some() {
        conditions.push(format!(
            "v.search_vector @@ plainto_tsquery('russian', ${})",
            bind_idx
        ));
        bind_idx += 1;
    }
    if params.title.is_some() {
        conditions.push(format!("v.title ILIKE '%' || ${} || '%'", bind_idx));
        bind_idx += 1;
    }
    if params.address.is_some() {
        conditions.push(format!("v.address ILIKE '%' || ${} || '%'", bind_idx));
        bind_idx += 1;
    }
    if params.capacity_min.is_some() {
        conditions.push(format!("v.capacity >= ${}", bind_idx));
        bind_idx += 1;
    }
    if params.capacity_max.is_some() {
        conditions.push(format!("v.capacity <= ${}", bind_idx));
        bind_idx += 1;
    }
    if params.price_min.is_some() {
        conditions.push(format!("v.price_per_hour >= ${}", bind_idx));
        bind_idx += 1;
    }
    if params.price_max.is_some() {
        conditions.push(format!("v.price_per_hour <= ${}", bind_idx));
        bind_idx += 1;
    }
    if params.category.is_some() {
        conditions.push(format!(
            "v.id IN (SELECT venue_id FROM venue_categories WHERE category_id = ${})",
            bind_idx
        ));
        bind_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let q = format!(
        "SELECT v.id, v.owner_id, v.title, v.description, v.capacity, v.price_per_hour,
                v.address, v.latitude, v.longitude, v.is_active, v.created_at,
                (SELECT AVG(r.rating)::FLOAT8 FROM reviews r
                  WHERE r.venue_id = v.id AND r.is_approved) AS average_rating,
                (SELECT COUNT(*) FROM reviews r
                  WHERE r.venue_id = v.id AND r.is_approved) AS reviews_count
         FROM venues v
         {}
         ORDER BY {}
         LIMIT ${} OFFSET ${}",
        where_clause,
        order_clause(params.ordering.as_deref()),
        bind_idx,
        bind_idx + 1
    );
    let count_q = format!("SELECT COUNT(*) FROM venues v {}", where_clause);

    let mut dbq = sqlx::query_as::<_, VenueWithRating>(&q);
    let mut countq = sqlx::query_scalar::<_, i64>(&count_q);

    if is_admin {
        if let Some(active) = params.is_active {
            dbq = dbq.bind(active);
            countq = countq.bind(active);
        }
    }
    if let Some(ref search) = params.search {
        let prepared = prepare_search_query(search);
        dbq = dbq.bind(prepared.clone());
        countq = countq.bind(prepared);
    }
    if let Some(ref title) = params.title {
        dbq = dbq.bind(title.clone());
        countq = countq.bind(title.clone());
    }
    if let Some(ref address) = params.address {
        dbq = dbq.bind(address.clone());
        countq = countq.bind(address.clone());
    }
    if let Some(capacity_min) = params.capacity_min {
        dbq = dbq.bind(capacity_min);
        countq = countq.bind(capacity_min);
    }
    if let Some(capacity_max) = params.capacity_max {
        dbq = dbq.bind(capacity_max);
        countq = countq.bind(capacity_max);
    }
    if let Some(price_min) = params.price_min {
        dbq = dbq.bind(price_min);
        countq = countq.bind(price_min);
    }
    if let Some(price_max) = params.price_max {
        dbq = dbq.bind(price_max);
        countq = countq.bind(price_max);
    }
    if let Some(category) = params.category {
        dbq = dbq.bind(category);
        countq = countq.bind(category);
    }

    let venues = dbq
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| db_error("list_venues", e))?;

    let count = countq
        .fetch_one(&state.db.pool)
        .await
        .map_err(|e| db_error("list_venues count", e))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "count": count,
            "page": page,
            "page_size": page_size,
            "results": venues
        })),
    ))
}

/* ---------- CRUD ПЛОЩАДОК ---------- */

#[derive(Debug, Deserialize, Validate)]
struct VenuePayload {
    #[validate(length(min = 1, max = 255, message = "Название: от 1 до 255 символов"))]
    title: String,
    #[serde(default)]
    description: String,
    #[validate(range(min = 1, message = "Вместимость должна быть не меньше 1"))]
    capacity: i32,
    #[validate(range(min = 0.0, message = "Цена не может быть отрицательной"))]
    price_per_hour: f64,
    #[validate(length(min = 1, max = 500, message = "Адрес: от 1 до 500 символов"))]
    address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    categories: Vec<i64>,
}

fn default_true() -> bool {
    true
}

// POST /api/venues (только для администраторов)
async fn create_venue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<VenuePayload>,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Только администратор может создавать площадки",
        ));
    }
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }

    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("create_venue", e))?;

    let venue: Venue = sqlx::query_as(
        "INSERT INTO venues (owner_id, title, description, capacity, price_per_hour,
                             address, latitude, longitude, is_active)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING id, owner_id, title, description, capacity, price_per_hour,
                   address, latitude, longitude, is_active, created_at",
    )
    .bind(user.user_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.capacity)
    .bind(req.price_per_hour)
    .bind(&req.address)
    .bind(req.latitude)
    .bind(req.longitude)
    .bind(req.is_active)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| db_error("create_venue", e))?;

    set_venue_categories(&mut tx, venue.id, &req.categories)
        .await
        .map_err(|e| db_error("create_venue categories", e))?;

    tx.commit().await.map_err(|e| db_error("create_venue", e))?;

    tracing::info!(
        "Venue created: ID={}, Title={}, Owner={}, Price={}",
        venue.id,
        venue.title,
        user.email,
        venue.price_per_hour
    );

    Ok((StatusCode::CREATED, Json(venue)))
}

async fn set_venue_categories(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    venue_id: i64,
    categories: &[i64],
) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM venue_categories WHERE venue_id = $1")
        .bind(venue_id)
        .execute(&mut **tx)
        .await?;
    for category_id in categories {
        sqlx::query(
            "INSERT INTO venue_categories (venue_id, category_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(venue_id)
        .bind(category_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

// GET /api/venues/{id}
// Детальная карточка: площадка + фотографии + категории + рейтинг из кеша
async fn get_venue(
    State(state): State<Arc<AppState>>,
    user: Option<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let is_admin = user.map(|u| u.is_admin()).unwrap_or(false);

    let venue: Option<Venue> = sqlx::query_as(
        "SELECT id, owner_id, title, description, capacity, price_per_hour,
                address, latitude, longitude, is_active, created_at
         FROM venues WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| db_error("get_venue", e))?;

    let venue = venue.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена"))?;

    // Неактивные площадки видят только администраторы
    if !venue.is_active && !is_admin {
        return Err(to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена"));
    }

    let images: Vec<VenueImage> = sqlx::query_as(
        "SELECT * FROM venue_images WHERE venue_id = $1 ORDER BY uploaded_at",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| db_error("get_venue images", e))?;

    let categories: Vec<Category> = sqlx::query_as(
        "SELECT c.id, c.name
         FROM categories c
         JOIN venue_categories vc ON vc.category_id = c.id
         WHERE vc.venue_id = $1
         ORDER BY c.name",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| db_error("get_venue categories", e))?;

    let rating = state.cache.get_venue_rating(id).await;

    Ok((
        StatusCode::OK,
        Json(json!({
            "venue": venue,
            "images": images,
            "categories": categories,
            "average_rating": rating.average_rating,
            "reviews_count": rating.reviews_count
        })),
    ))
}

// PUT /api/venues/{id} (только для администраторов)
async fn update_venue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<VenuePayload>,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Только администратор может изменять площадки",
        ));
    }
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }

    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| db_error("update_venue", e))?;

    let venue: Option<Venue> = sqlx::query_as(
        "UPDATE venues
         SET title = $2, description = $3, capacity = $4, price_per_hour = $5,
             address = $6, latitude = $7, longitude = $8, is_active = $9
         WHERE id = $1
         RETURNING id, owner_id, title, description, capacity, price_per_hour,
                   address, latitude, longitude, is_active, created_at",
    )
    .bind(id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.capacity)
    .bind(req.price_per_hour)
    .bind(&req.address)
    .bind(req.latitude)
    .bind(req.longitude)
    .bind(req.is_active)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| db_error("update_venue", e))?;

    let venue = venue.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена"))?;

    set_venue_categories(&mut tx, id, &req.categories)
        .await
        .map_err(|e| db_error("update_venue categories", e))?;

    tx.commit().await.map_err(|e| db_error("update_venue", e))?;

    tracing::info!("Venue updated: ID={}, Title={}, Editor={}", id, venue.title, user.email);

    Ok((StatusCode::OK, Json(venue)))
}

// DELETE /api/venues/{id} (только для администраторов)
// Каскадом удаляются брони, отзывы и фотографии площадки
async fn delete_venue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Только администратор может удалять площадки",
        ));
    }

    let title: Option<String> = sqlx::query_scalar("SELECT title FROM venues WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| db_error("delete_venue", e))?;

    let title = title.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена"))?;

    sqlx::query("DELETE FROM venues WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| db_error("delete_venue", e))?;

    state.cache.invalidate_venue_rating(id).await;

    tracing::warn!("Venue deleted: ID={}, Title={}, Deleted by={}", id, title, user.email);

    Ok(StatusCode::NO_CONTENT)
}

/* ---------- КАТЕГОРИИ ---------- */

// GET /api/venues/categories
async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let categories: Vec<Category> =
        sqlx::query_as("SELECT id, name FROM categories ORDER BY name")
            .fetch_all(&state.db.pool)
            .await
            .map_err(|e| db_error("list_categories", e))?;

    Ok((StatusCode::OK, Json(categories)))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 255, message = "Название: от 1 до 255 символов"))]
    name: String,
}

// POST /api/venues/categories (только для администраторов)
async fn create_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }

    let category: Result<Category, sqlx::Error> =
        sqlx::query_as("INSERT INTO categories (name) VALUES ($1) RETURNING id, name")
            .bind(&req.name)
            .fetch_one(&state.db.pool)
            .await;

    match category {
        Ok(category) => Ok((StatusCode::CREATED, Json(category))),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(field_error("name", "Категория с таким названием уже существует"))
        }
        Err(e) => Err(db_error("create_category", e)),
    }
}

/* ---------- ФОТОГРАФИИ ---------- */

// POST /api/venues/{id}/images (админ или владелец площадки)
async fn upload_image(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let owner_id: Option<Option<i64>> =
        sqlx::query_scalar("SELECT owner_id FROM venues WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db.pool)
            .await
            .map_err(|e| db_error("upload_image", e))?;

    let owner_id =
        owner_id.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Площадка не найдена"))?;

    if !user.can_access(owner_id.unwrap_or(-1)) {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Нет прав для загрузки фотографий",
        ));
    }

    // Берём первую файловую часть формы
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|_| {
        to_api_error(StatusCode::BAD_REQUEST, "Некорректный multipart-запрос")
    })? {
        if field.file_name().is_some() {
            let name = field.file_name().unwrap_or("image.jpg").to_string();
            let data = field.bytes().await.map_err(|_| {
                to_api_error(StatusCode::BAD_REQUEST, "Не удалось прочитать файл")
            })?;
            upload = Some((name, data.to_vec()));
            break;
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| field_error("image", "Файл изображения не передан"))?;

    // Декодирование и ресайз - CPU-bound, уводим с реактора
    let media_root = PathBuf::from(&state.config.media.root);
    let stored = tokio::task::spawn_blocking(move || {
        thumbnails::store_with_thumbnails(&media_root, &data, &file_name)
    })
    .await
    .map_err(|e| {
        tracing::error!("thumbnail task panicked: {:?}", e);
        to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка обработки изображения")
    })?
    .map_err(|e| {
        tracing::error!("Error generating thumbnails: {:?}", e);
        field_error("image", "Не удалось обработать изображение")
    })?;

    let image: VenueImage = sqlx::query_as(
        "INSERT INTO venue_images (venue_id, image, thumbnail_small, thumbnail_medium,
                                   thumbnail_large, thumbnail_small_webp,
                                   thumbnail_medium_webp, thumbnail_large_webp)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(id)
    .bind(&stored.image)
    .bind(&stored.thumbnails.small)
    .bind(&stored.thumbnails.medium)
    .bind(&stored.thumbnails.large)
    .bind(&stored.thumbnails.small_webp)
    .bind(&stored.thumbnails.medium_webp)
    .bind(&stored.thumbnails.large_webp)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| db_error("upload_image", e))?;

    Ok((StatusCode::CREATED, Json(image)))
}

#[derive(sqlx::FromRow)]
struct ImageWithOwner {
    owner_id: Option<i64>,
    #[sqlx(flatten)]
    image: VenueImage,
}

// DELETE /api/venues/{id}/images/{image_id}
async fn delete_image(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, image_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let row: Option<ImageWithOwner> = sqlx::query_as(
        "SELECT v.owner_id, i.*
         FROM venue_images i
         JOIN venues v ON v.id = i.venue_id
         WHERE i.id = $1 AND i.venue_id = $2",
    )
    .bind(image_id)
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| db_error("delete_image", e))?;

    let ImageWithOwner { owner_id, image } =
        row.ok_or_else(|| to_api_error(StatusCode::NOT_FOUND, "Изображение не найдено"))?;

    if !user.can_access(owner_id.unwrap_or(-1)) {
        return Err(to_api_error(
            StatusCode::FORBIDDEN,
            "Нет прав для удаления фотографий",
        ));
    }

    sqlx::query("DELETE FROM venue_images WHERE id = $1")
        .bind(image_id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| db_error("delete_image", e))?;

    // Файлы чистим после удаления записи; отсутствие файла не ошибка
    let media_root = PathBuf::from(&state.config.media.root);
    let paths = vec![
        Some(image.image),
        image.thumbnail_small,
        image.thumbnail_medium,
        image.thumbnail_large,
        image.thumbnail_small_webp,
        image.thumbnail_medium_webp,
        image.thumbnail_large_webp,
    ];
    tokio::task::spawn_blocking(move || thumbnails::remove_image_files(&media_root, &paths))
        .await
        .ok();

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_is_sanitized() {
        assert_eq!(prepare_search_query("концертный   зал!"), "концертный зал");
        assert_eq!(prepare_search_query("lofts & co; drop--"), "lofts co drop--");
    }

    #[test]
    fn ordering_whitelist_falls_back_to_default() {
        assert_eq!(order_clause(Some("price_per_hour")), "v.price_per_hour");
        assert_eq!(order_clause(Some("v.id; DROP TABLE venues")), "v.created_at DESC");
        assert_eq!(order_clause(None), "v.created_at DESC");
    }
}
