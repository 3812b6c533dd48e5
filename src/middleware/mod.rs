use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

// JWT claims токена доступа
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub role: String,
    pub exp: i64,
}

/// Выпускает токен доступа для пользователя (логин).
pub fn issue_token(
    user: &crate::models::User,
    jwt: &crate::config::JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user.user_id,
        email: user.email.clone(),
        role: user.role.clone(),
        exp: (Utc::now() + chrono::Duration::hours(jwt.expires_in_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    // Явный предикат доступа: администратор или владелец объекта
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || owner_id == self.user_id
    }
}

// Структура для результата из БД
#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: i64,
    email: String,
    full_name: String,
    role: String,
}

// Bearer JWT extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Получаем заголовок Authorization
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Подпись и срок действия проверяет jsonwebtoken
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .claims;

        // Пользователь должен существовать и быть активным:
        // роль и блокировка проверяются по базе, а не по токену
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, email, full_name, role
             FROM users
             WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(claims.sub)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let user = row.ok_or(StatusCode::UNAUTHORIZED)?;

        // Обновляем last_logged_in с защитой от частых записей
        if state.cache.should_update_last_login(user.user_id).await {
            sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE user_id = $1")
                .bind(user.user_id)
                .execute(&state.db.pool)
                .await
                .ok(); // Игнорируем ошибку обновления
        }

        Ok(AuthUser {
            user_id: user.user_id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
        })
    }
}

// Для публичных маршрутов, где авторизация опциональна
// (например, админ видит неактивные площадки в общем списке)
impl OptionalFromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(
            <AuthUser as FromRequestParts<Arc<crate::AppState>>>::from_request_parts(parts, state)
                .await
                .ok(),
        )
    }
}

/// Middleware для логирования критических событий безопасности.
pub async fn security_logging(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let response = next.run(req).await;

    match response.status() {
        StatusCode::UNAUTHORIZED => {
            tracing::warn!(
                target: "security",
                "Unauthorized access attempt: Path={}, Method={}",
                path,
                method
            );
        }
        StatusCode::FORBIDDEN => {
            tracing::warn!(
                target: "security",
                "Forbidden access attempt: Path={}, Method={}",
                path,
                method
            );
        }
        _ => {}
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_user(role: &str, user_id: i64) -> AuthUser {
        AuthUser {
            user_id,
            email: "user@test.com".to_string(),
            full_name: "Тест Тестов".to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn admin_can_access_any_object() {
        let admin = auth_user("admin", 1);
        assert!(admin.can_access(1));
        assert!(admin.can_access(999));
    }

    #[test]
    fn user_can_access_only_own_objects() {
        let user = auth_user("user", 5);
        assert!(user.can_access(5));
        assert!(!user.can_access(6));
        assert!(!user.is_admin());
    }
}
