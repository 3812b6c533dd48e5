use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{db_error, field_error, to_api_error, validation_errors, ApiResult};
use crate::{middleware::AuthUser, models::User, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/profile", get(get_profile).patch(update_profile))
        .route("/users/change-password", post(change_password))
}

/* ---------- РЕГИСТРАЦИЯ И ЛОГИН ---------- */

// POST /api/users/register
#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 3, max = 150, message = "Имя пользователя: от 3 до 150 символов"))]
    username: String,
    #[validate(email(message = "Некорректный email"))]
    email: String,
    #[validate(length(min = 8, message = "Пароль должен быть не короче 8 символов"))]
    password: String,
    password2: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    phone: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }
    if req.password != req.password2 {
        return Err(field_error("password", "Пароли не совпадают"));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| {
            tracing::error!("bcrypt hash error: {:?}", e);
            to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сервера")
        })?;

    let user: Result<User, sqlx::Error> = sqlx::query_as(
        "INSERT INTO users (username, email, password_hash, full_name, phone, role)
         VALUES ($1, $2, $3, $4, $5, 'user')
         RETURNING *",
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.full_name)
    .bind(&req.phone)
    .fetch_one(&state.db.pool)
    .await;

    match user {
        Ok(user) => {
            tracing::info!("User registered: id={}, email={}", user.user_id, user.email);
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "user": user,
                    "message": "Пользователь успешно зарегистрирован"
                })),
            ))
        }
        // Уникальность username/email проверяет БД
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            let field = if e.constraint() == Some("users_email_key") {
                "email"
            } else {
                "username"
            };
            Err(field_error(field, "Пользователь с таким значением уже существует"))
        }
        Err(e) => Err(db_error("register", e)),
    }
}

// POST /api/users/login
#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = User::find_by_email(&req.email, &state.db)
        .await
        .map_err(|e| db_error("login", e))?;

    // Одинаковый ответ для неизвестного email и неверного пароля
    let user = match user {
        Some(user) if user.is_active && user.verify_password(&req.password) => user,
        _ => {
            return Err(to_api_error(
                StatusCode::UNAUTHORIZED,
                "Неверный email или пароль",
            ))
        }
    };

    let token = crate::middleware::issue_token(&user, &state.config.jwt).map_err(|e| {
        tracing::error!("JWT encode error: {:?}", e);
        to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сервера")
    })?;

    sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.db.pool)
        .await
        .ok();

    Ok((
        StatusCode::OK,
        Json(json!({ "access": token, "user": user })),
    ))
}

/* ---------- ПРОФИЛЬ ---------- */

// GET /api/users/profile
async fn get_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let profile: User = sqlx::query_as("SELECT * FROM users WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db.pool)
        .await
        .map_err(|e| db_error("get_profile", e))?;

    Ok((StatusCode::OK, Json(profile)))
}

// PATCH /api/users/profile
// username и role менять нельзя
#[derive(Debug, Deserialize, Validate)]
struct UpdateProfileRequest {
    #[validate(email(message = "Некорректный email"))]
    email: Option<String>,
    full_name: Option<String>,
    phone: Option<String>,
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }

    let updated: Result<User, sqlx::Error> = sqlx::query_as(
        "UPDATE users
         SET email = COALESCE($2, email),
             full_name = COALESCE($3, full_name),
             phone = COALESCE($4, phone)
         WHERE user_id = $1
         RETURNING *",
    )
    .bind(user.user_id)
    .bind(&req.email)
    .bind(&req.full_name)
    .bind(&req.phone)
    .fetch_one(&state.db.pool)
    .await;

    match updated {
        Ok(profile) => Ok((StatusCode::OK, Json(profile))),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(field_error("email", "Email уже занят"))
        }
        Err(e) => Err(db_error("update_profile", e)),
    }
}

// POST /api/users/change-password
#[derive(Debug, Deserialize, Validate)]
struct ChangePasswordRequest {
    old_password: String,
    #[validate(length(min = 8, message = "Пароль должен быть не короче 8 символов"))]
    new_password: String,
    new_password2: String,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Err(e) = req.validate() {
        return Err(validation_errors(&e));
    }
    if req.new_password != req.new_password2 {
        return Err(field_error("new_password", "Пароли не совпадают"));
    }

    let current: User = sqlx::query_as("SELECT * FROM users WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db.pool)
        .await
        .map_err(|e| db_error("change_password", e))?;

    // Проверка старого пароля
    if !current.verify_password(&req.old_password) {
        return Err(field_error("old_password", "Неверный пароль"));
    }

    let password_hash = bcrypt::hash(&req.new_password, bcrypt::DEFAULT_COST)
        .map_err(|e| {
            tracing::error!("bcrypt hash error: {:?}", e);
            to_api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сервера")
        })?;

    sqlx::query("UPDATE users SET password_hash = $2 WHERE user_id = $1")
        .bind(user.user_id)
        .bind(&password_hash)
        .execute(&state.db.pool)
        .await
        .map_err(|e| db_error("change_password", e))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Пароль успешно изменен" })),
    ))
}

/* ---------- АДМИНИСТРИРОВАНИЕ ---------- */

// GET /api/users - список всех пользователей (только для администраторов)
async fn list_users(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(to_api_error(StatusCode::FORBIDDEN, "Недостаточно прав"));
    }

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY date_joined DESC")
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| db_error("list_users", e))?;

    Ok((StatusCode::OK, Json(users)))
}
