use crate::cache::CacheService;
use redis::AsyncCommands;

fn throttle_key(scope: &str, user_id: i64) -> String {
    format!("throttle:{}:{}", scope, user_id)
}

impl CacheService {
    /// Учитывает операцию пользователя и возвращает true, если лимит
    /// превышен. Окно задаётся TTL ключа: INCR + EXPIRE при первом хите.
    /// Если Redis недоступен, запрос пропускается (fail-open).
    pub async fn hit_rate_limit(
        &self,
        scope: &str,
        user_id: i64,
        limit: u32,
        window_secs: u64,
    ) -> bool {
        let key = throttle_key(scope, user_id);
        let mut conn = self.redis.conn.clone();

        let count: i64 = match conn.incr(&key, 1).await {
            Ok(count) => count,
            Err(_) => return false,
        };

        if count == 1 {
            let _: Result<(), _> = conn.expire(&key, window_secs as i64).await;
        }

        count > limit as i64
    }

    // last_logged_in обновляем не чаще раза в 15 минут
    pub async fn should_update_last_login(&self, user_id: i64) -> bool {
        let key = format!("last_login_update:{}", user_id);
        let mut conn = self.redis.conn.clone();
        let result: Result<String, _> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(900)
            .query_async(&mut conn)
            .await;
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_key_is_scoped_per_user() {
        assert_eq!(throttle_key("booking", 7), "throttle:booking:7");
        assert_ne!(throttle_key("booking", 7), throttle_key("review", 7));
    }
}
