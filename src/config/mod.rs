use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
    pub throttle: ThrottleConfig,
    pub cache_ttl: CacheTtlConfig,
    pub media: MediaConfig,
    pub features: FeatureFlags,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub cors_allowed_origins: Vec<String>,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Правила бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub min_duration_hours: f64,
    pub max_duration_hours: f64,
    pub max_advance_days: i64,
}

// Лимиты частоты критических операций (на пользователя)
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    pub bookings_per_hour: u32,
    pub reviews_per_day: u32,
}

// Время жизни кеша (секунды)
#[derive(Debug, Clone, Deserialize)]
pub struct CacheTtlConfig {
    pub venue_rating: u64,
}

// Хранение загружаемых файлов
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub root: String,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_rate_limiting: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "rental_system=debug,tower_http=debug".to_string()),
                cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
                expires_in_hours: env::var("JWT_EXPIRES_IN_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .expect("JWT_EXPIRES_IN_HOURS must be a valid number"),
            },
            booking: BookingConfig {
                min_duration_hours: env::var("BOOKING_MIN_DURATION_HOURS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .expect("BOOKING_MIN_DURATION_HOURS must be a valid number"),
                max_duration_hours: env::var("BOOKING_MAX_DURATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .expect("BOOKING_MAX_DURATION_HOURS must be a valid number"),
                max_advance_days: env::var("BOOKING_MAX_ADVANCE_DAYS")
                    .unwrap_or_else(|_| "90".to_string())
                    .parse()
                    .expect("BOOKING_MAX_ADVANCE_DAYS must be a valid number"),
            },
            throttle: ThrottleConfig {
                bookings_per_hour: env::var("THROTTLE_BOOKINGS_PER_HOUR")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("THROTTLE_BOOKINGS_PER_HOUR must be a valid number"),
                reviews_per_day: env::var("THROTTLE_REVIEWS_PER_DAY")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("THROTTLE_REVIEWS_PER_DAY must be a valid number"),
            },
            cache_ttl: CacheTtlConfig {
                venue_rating: env::var("CACHE_TTL_VENUE_RATING")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .expect("CACHE_TTL_VENUE_RATING must be a valid number"),
            },
            media: MediaConfig {
                root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()),
            },
            features: FeatureFlags {
                enable_rate_limiting: env::var("ENABLE_RATE_LIMITING")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("ENABLE_RATE_LIMITING must be true or false"),
            },
        }
    }

    // Правила бронирования в виде, который использует валидатор
    pub fn booking_rules(&self) -> crate::services::booking_validator::BookingRules {
        crate::services::booking_validator::BookingRules {
            min_duration_hours: self.booking.min_duration_hours,
            max_duration_hours: self.booking.max_duration_hours,
            max_advance_days: self.booking.max_advance_days,
        }
    }
}
