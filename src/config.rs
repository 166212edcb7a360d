use serde::{Deserialize, Serialize};

/// Gateway configuration root
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// One upstream endpoint: the addressable unit for routing and cooldowns
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Provider name ("openai", "azure", "anthropic", "studio", "vertex",
    /// "bedrock", "cohere", "groq", "openrouter", "huggingface")
    pub provider: String,
    /// Provider region (e.g. "us-east5"); "default" for global providers
    #[serde(default = "default_region")]
    pub region: String,
    /// Model name exposed to clients
    pub model: String,
    /// Extra client-facing names that route to this endpoint
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Upstream model name, when it differs from the exposed one
    #[serde(default)]
    pub upstream_model: Option<String>,
    pub api_key: String,
    /// Override for the provider's default base URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Lower value wins among equally healthy candidates
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Azure deployment name / API version, Bedrock credentials, etc.
    #[serde(default)]
    pub extra: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Cooldown armed on quota failures, and the probe interval for busy endpoints
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            ping_interval_seconds: default_ping_interval_seconds(),
        }
    }
}

/// Which cooldown limiter backend to use.
///
/// `memory` is per-process; `redis` shares the `ogem:disabled:*` keyspace
/// across replicas. Selectable via `OGEM__LIMITER__BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterConfig {
    #[serde(default = "default_limiter_backend")]
    pub backend: LimiterBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            backend: default_limiter_backend(),
            redis_url: None,
        }
    }
}

fn default_region() -> String {
    "default".to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_priority() -> u32 {
    1
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_ping_interval_seconds() -> u64 {
    60
}

fn default_limiter_backend() -> LimiterBackend {
    LimiterBackend::Memory
}

pub fn load_config() -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("ogem").required(false))
        .add_source(config::Environment::with_prefix("OGEM").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.endpoints.is_empty() {
        anyhow::bail!("At least one endpoint must be configured");
    }

    for endpoint in &cfg.endpoints {
        if endpoint.model.is_empty() {
            anyhow::bail!("Endpoint model name cannot be empty");
        }
        endpoint
            .provider
            .parse::<crate::providers::Provider>()
            .map_err(|e| anyhow::anyhow!("Endpoint '{}': {}", endpoint.model, e))?;
    }

    if cfg.routing.cooldown_seconds == 0 {
        anyhow::bail!("routing.cooldown_seconds must be greater than zero");
    }

    if cfg.limiter.backend == LimiterBackend::Redis && cfg.limiter.redis_url.is_none() {
        anyhow::bail!("limiter.redis_url is required when limiter.backend is 'redis'");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            endpoints: vec![EndpointConfig {
                provider: "openai".to_string(),
                region: "default".to_string(),
                model: "gpt-4o".to_string(),
                aliases: vec![],
                upstream_model: None,
                api_key: "sk-test".to_string(),
                base_url: None,
                timeout_seconds: 300,
                priority: 1,
                extra: Default::default(),
            }],
            routing: RoutingConfig::default(),
            limiter: LimiterConfig::default(),
        }
    }

    #[test]
    fn test_validate_config_requires_endpoints() {
        let mut cfg = create_test_config();
        cfg.endpoints.clear();

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("At least one endpoint"));
    }

    #[test]
    fn test_validate_config_rejects_unknown_provider() {
        let mut cfg = create_test_config();
        cfg.endpoints[0].provider = "frontier-labs".to_string();

        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_redis_requires_url() {
        let mut cfg = create_test_config();
        cfg.limiter.backend = LimiterBackend::Redis;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("redis_url"));
    }

    #[test]
    fn test_validate_config_ok() {
        assert!(validate_config(&create_test_config()).is_ok());
    }

    #[test]
    fn test_limiter_backend_parses_lowercase() {
        let cfg: LimiterConfig =
            serde_json::from_str(r#"{"backend":"redis","redis_url":"redis://localhost"}"#).unwrap();
        assert_eq!(cfg.backend, LimiterBackend::Redis);
    }
}
