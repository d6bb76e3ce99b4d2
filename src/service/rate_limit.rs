//! Session and IP rate limiting backed by Redis sliding windows
//!
//! Enforced at the boundary before a pipeline run starts. An unreachable
//! Redis fails open: analysis availability outranks strict throttling.

use chrono::{DateTime, Duration, DurationRound, Utc};
use redis::AsyncCommands;

use crate::model::config::LimitsConfig;

const IP_BLOCK_SECONDS: i64 = 600;

#[derive(Debug, thiserror::Error)]
#[error("Rate limited until {reset_time}")]
pub struct RateLimited {
    pub reset_time: DateTime<Utc>,
    pub scope: RateLimitScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    PerMinuteIp,
    Hourly,
    Daily,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::PerMinuteIp => "per_minute_ip",
            RateLimitScope::Hourly => "hourly",
            RateLimitScope::Daily => "daily",
        }
    }
}

pub struct RateLimiter {
    client: Option<redis::Client>,
    limits: LimitsConfig,
}

impl RateLimiter {
    pub fn new(redis_url: Option<&str>, limits: LimitsConfig) -> Self {
        let client = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => {
                    tracing::info!("Rate limiter connected to Redis");
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable, rate limiting disabled");
                    None
                }
            },
            None => {
                tracing::warn!("No Redis URL configured, rate limiting disabled");
                None
            }
        };
        Self { client, limits }
    }

    /// Check and consume one request slot for the session/ip pair.
    ///
    /// Redis errors fail open with a single error log; only a genuinely
    /// exceeded window produces `RateLimited`.
    pub async fn check(&self, session_id: &str, ip: &str) -> Result<(), RateLimited> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Redis connection failed during rate limiting, failing open");
                return Ok(());
            }
        };

        let now = Utc::now();

        // IP-level bot protection: short window plus a temporary block key.
        let block_key = format!("block:ip:{ip}");
        match conn.exists::<_, bool>(&block_key).await {
            Ok(true) => {
                return Err(RateLimited {
                    reset_time: now + Duration::seconds(IP_BLOCK_SECONDS),
                    scope: RateLimitScope::PerMinuteIp,
                });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Redis error during rate limiting, failing open");
                return Ok(());
            }
        }

        let ip_count = match self
            .bump(&mut conn, &ip_minute_key(ip, now), 60)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Redis error during rate limiting, failing open");
                return Ok(());
            }
        };
        if ip_count > self.limits.per_minute_ip as i64 {
            let _: Result<(), _> = conn
                .set_ex(&block_key, 1, IP_BLOCK_SECONDS as u64)
                .await;
            tracing::warn!(ip_count = ip_count, "IP rate limit exceeded, blocking");
            return Err(RateLimited {
                reset_time: now + Duration::seconds(IP_BLOCK_SECONDS),
                scope: RateLimitScope::PerMinuteIp,
            });
        }

        // Session-level throttling.
        let hourly = self
            .bump(&mut conn, &session_hourly_key(session_id, now), 3600)
            .await;
        let daily = self
            .bump(&mut conn, &session_daily_key(session_id, now), 86400)
            .await;

        match (hourly, daily) {
            (Ok(hourly_count), Ok(daily_count)) => {
                if daily_count > self.limits.daily as i64 {
                    return Err(RateLimited {
                        reset_time: next_day(now),
                        scope: RateLimitScope::Daily,
                    });
                }
                if hourly_count > self.limits.hourly as i64 {
                    return Err(RateLimited {
                        reset_time: next_hour(now),
                        scope: RateLimitScope::Hourly,
                    });
                }
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Redis error during rate limiting, failing open");
                Ok(())
            }
        }
    }

    /// Increment a window counter, setting its expiry only on first use.
    async fn bump(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
        ttl_seconds: i64,
    ) -> Result<i64, redis::RedisError> {
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .arg("NX")
            .ignore()
            .query_async(conn)
            .await?;
        Ok(count)
    }
}

fn ip_minute_key(ip: &str, now: DateTime<Utc>) -> String {
    format!("rate_limit:ip:{ip}:{}", now.format("%Y%m%d%H%M"))
}

fn session_hourly_key(session_id: &str, now: DateTime<Utc>) -> String {
    format!(
        "rate_limit:session:{session_id}:hourly:{}",
        now.format("%Y%m%d%H")
    )
}

fn session_daily_key(session_id: &str, now: DateTime<Utc>) -> String {
    format!(
        "rate_limit:session:{session_id}:daily:{}",
        now.format("%Y%m%d")
    )
}

fn next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now) + Duration::hours(1)
}

fn next_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::days(1)).unwrap_or(now) + Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_keys_partition_time() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 59, 59).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        assert_ne!(ip_minute_key("1.2.3.4", t1), ip_minute_key("1.2.3.4", t2));
        assert_ne!(
            session_hourly_key("s", t1),
            session_hourly_key("s", t2)
        );
        assert_eq!(session_daily_key("s", t1), session_daily_key("s", t2));
    }

    #[test]
    fn reset_times_land_on_window_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 30).unwrap();
        assert_eq!(
            next_hour(now),
            Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap()
        );
        assert_eq!(
            next_day(now),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn missing_redis_fails_open() {
        let limiter = RateLimiter::new(None, LimitsConfig::default());
        assert!(limiter.check("session", "1.2.3.4").await.is_ok());
    }
}
