use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

use crate::error::GatewayError;
use crate::limiter::{disabled_key, Admission, RateLimiter};

/// Check the store clock, compare against the stored `disabled_until`
/// microsecond timestamp, and arm the cooldown if the window has passed.
/// Returns `{allowed, remaining_us}`. The key expires with the cooldown so
/// stale entries self-evict.
const ADMIT_SCRIPT: &str = r#"
redis.replicate_commands()
local time = redis.call('TIME')
local now = time[1] * 1000000 + time[2]
local cooldown = tonumber(ARGV[1])
local until_us = tonumber(redis.call('GET', KEYS[1]))
if until_us and until_us > now then
    return {0, until_us - now}
end
redis.call('SET', KEYS[1], now + cooldown, 'PX', math.ceil(cooldown / 1000))
return {1, 0}
"#;

/// Unconditionally re-arm the cooldown from the store clock
const DISABLE_SCRIPT: &str = r#"
redis.replicate_commands()
local time = redis.call('TIME')
local now = time[1] * 1000000 + time[2]
local cooldown = tonumber(ARGV[1])
redis.call('SET', KEYS[1], now + cooldown, 'PX', math.ceil(cooldown / 1000))
return 1
"#;

/// Cooldown limiter over a shared redis keyspace.
///
/// All clock reads happen inside the server-side script, so admissions are
/// consistent across replicas regardless of local clock drift, and the
/// read-compare-write is atomic under concurrent callers.
pub struct RedisLimiter {
    connection: ConnectionManager,
    admit_script: Script,
    disable_script: Script,
}

impl RedisLimiter {
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::LimiterUnavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::LimiterUnavailable(e.to_string()))?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            admit_script: Script::new(ADMIT_SCRIPT),
            disable_script: Script::new(DISABLE_SCRIPT),
        }
    }
}

#[async_trait]
impl RateLimiter for RedisLimiter {
    async fn admit(
        &self,
        provider: &str,
        region: &str,
        model: &str,
        cooldown: Duration,
    ) -> Result<Admission, GatewayError> {
        let key = disabled_key(provider, region, model);
        let mut connection = self.connection.clone();

        let (allowed, remaining_us): (i64, i64) = self
            .admit_script
            .key(&key)
            .arg(cooldown.as_micros() as i64)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| GatewayError::LimiterUnavailable(e.to_string()))?;

        if allowed == 1 {
            Ok(Admission::allowed())
        } else {
            Ok(Admission::denied(Duration::from_micros(
                remaining_us.max(0) as u64,
            )))
        }
    }

    async fn disable(
        &self,
        provider: &str,
        region: &str,
        model: &str,
        cooldown: Duration,
    ) -> Result<(), GatewayError> {
        let key = disabled_key(provider, region, model);
        let mut connection = self.connection.clone();

        let _: i64 = self
            .disable_script
            .key(&key)
            .arg(cooldown.as_micros() as i64)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| GatewayError::LimiterUnavailable(e.to_string()))?;

        Ok(())
    }
}
