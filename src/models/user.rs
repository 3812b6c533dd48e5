use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub phone: String,
    pub role: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_logged_in: Option<DateTime<Utc>>,
}

impl User {
    // Найти пользователя по email
    pub async fn find_by_email(
        email: &str,
        db: &crate::database::Database,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&db.pool)
            .await
    }

    // Роль admin даёт полный доступ
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    // Проверить пароль против bcrypt-хеша
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}
