use async_trait::async_trait;
use std::time::Duration;

use crate::error::GatewayError;

pub mod memory;
pub mod redis;

pub use memory::MemoryLimiter;
pub use redis::RedisLimiter;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Remaining cooldown when denied; zero when allowed
    pub retry_after: Duration,
}

impl Admission {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Distributed cooldown limiter over `(provider, region, model)` endpoints.
///
/// `admit` doubles as a probe: an allowed call re-arms the cooldown, so a
/// busy endpoint is retried at a bounded rate instead of being hammered.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// If the endpoint is outside its cooldown window, disable it for
    /// another `cooldown` and allow the call; otherwise deny with the
    /// remaining wait. Atomic with respect to concurrent callers.
    async fn admit(
        &self,
        provider: &str,
        region: &str,
        model: &str,
        cooldown: Duration,
    ) -> Result<Admission, GatewayError>;

    /// Unconditionally arm (or re-arm) the cooldown to now + `cooldown`.
    async fn disable(
        &self,
        provider: &str,
        region: &str,
        model: &str,
        cooldown: Duration,
    ) -> Result<(), GatewayError>;
}

/// Shared-keyspace naming for cooldown entries
pub fn disabled_key(provider: &str, region: &str, model: &str) -> String {
    format!("ogem:disabled:{}:{}:{}", provider, region, model)
}

/// Build the limiter selected by configuration: in-process by default, the
/// shared redis keyspace when replicas must agree
pub async fn from_config(
    config: &crate::config::LimiterConfig,
) -> Result<std::sync::Arc<dyn RateLimiter>, GatewayError> {
    match config.backend {
        crate::config::LimiterBackend::Memory => {
            Ok(std::sync::Arc::new(MemoryLimiter::new()))
        }
        crate::config::LimiterBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                GatewayError::Config("limiter.redis_url is required for the redis backend".to_string())
            })?;
            Ok(std::sync::Arc::new(RedisLimiter::connect(url).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_key_naming() {
        assert_eq!(
            disabled_key("openai", "default", "gpt-4o"),
            "ogem:disabled:openai:default:gpt-4o"
        );
    }
}
