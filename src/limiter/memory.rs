use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::GatewayError;
use crate::limiter::{disabled_key, Admission, RateLimiter};

/// In-process cooldown limiter.
///
/// Used for single-replica deployments and as the degraded mode when the
/// shared store is not configured. Times are monotonic local instants, so
/// entries never misbehave across wall-clock adjustments.
#[derive(Default)]
pub struct MemoryLimiter {
    disabled_until: DashMap<String, Instant>,
}

impl MemoryLimiter {
    pub fn new() -> Self {
        Self {
            disabled_until: DashMap::new(),
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryLimiter {
    async fn admit(
        &self,
        provider: &str,
        region: &str,
        model: &str,
        cooldown: Duration,
    ) -> Result<Admission, GatewayError> {
        let key = disabled_key(provider, region, model);
        let now = Instant::now();

        // The shard entry lock makes check-and-arm atomic across tasks
        match self.disabled_until.entry(key) {
            Entry::Occupied(mut entry) => {
                let until = *entry.get();
                if until > now {
                    Ok(Admission::denied(until - now))
                } else {
                    entry.insert(now + cooldown);
                    Ok(Admission::allowed())
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + cooldown);
                Ok(Admission::allowed())
            }
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
        self.disabled_until.insert(key, Instant::now() + cooldown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_admit_allowed_then_denied() {
        let limiter = MemoryLimiter::new();
        let cooldown = Duration::from_secs(5);

        let first = limiter
            .admit("openai", "default", "gpt-4o", cooldown)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.retry_after, Duration::ZERO);

        let second = limiter
            .admit("openai", "default", "gpt-4o", cooldown)
            .await
            .unwrap();
        assert!(!second.allowed);
        assert!(second.retry_after > Duration::ZERO);
        assert!(second.retry_after <= cooldown);
    }

    #[tokio::test]
    async fn test_admit_allowed_again_after_cooldown() {
        let limiter = MemoryLimiter::new();
        let cooldown = Duration::from_millis(20);

        assert!(limiter
            .admit("openai", "default", "gpt-4o", cooldown)
            .await
            .unwrap()
            .allowed);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(limiter
            .admit("openai", "default", "gpt-4o", cooldown)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_endpoints_do_not_interfere() {
        let limiter = MemoryLimiter::new();
        let cooldown = Duration::from_secs(5);

        assert!(limiter
            .admit("openai", "default", "gpt-4o", cooldown)
            .await
            .unwrap()
            .allowed);
        assert!(limiter
            .admit("vertex", "us-east5", "gpt-4o", cooldown)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_disable_denies_following_admit() {
        let limiter = MemoryLimiter::new();
        let cooldown = Duration::from_secs(5);

        limiter
            .disable("studio", "default", "gemini-2.0-flash", cooldown)
            .await
            .unwrap();

        let admission = limiter
            .admit("studio", "default", "gemini-2.0-flash", cooldown)
            .await
            .unwrap();
        assert!(!admission.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_admits_let_exactly_one_through() {
        let limiter = Arc::new(MemoryLimiter::new());
        let cooldown = Duration::from_secs(5);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter
                    .admit("openai", "default", "gpt-4o", cooldown)
                    .await
                    .unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            let admission = handle.await.unwrap();
            if admission.allowed {
                allowed += 1;
            } else {
                assert!(admission.retry_after <= cooldown);
            }
        }
        assert_eq!(allowed, 1);
    }
}
