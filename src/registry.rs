use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::batch::{strip_batch_suffix, BatchConfig, OpenAiBatchEndpoint};
use crate::config::{Config, EndpointConfig};
use crate::error::GatewayError;
use crate::image_utils::HttpImageFetcher;
use crate::providers::{
    anthropic::AnthropicEndpoint, azure::AzureEndpoint, bedrock::BedrockEndpoint,
    cohere::CohereEndpoint, gemini::GeminiEndpoint, openai::OpenAiEndpoint, Endpoint, Provider,
};

/// One configured endpoint plus its routing metadata
struct RegisteredEndpoint {
    endpoint: Arc<dyn Endpoint>,
    /// Deferred-execution twin for providers that support it
    batch_endpoint: Option<Arc<dyn Endpoint>>,
    model: String,
    aliases: Vec<String>,
    priority: u32,
}

/// Ping metadata; reads vastly outnumber writes
struct EndpointHealth {
    healthy: bool,
    latency: Option<Duration>,
    last_checked: Option<Instant>,
}

/// A selection candidate handed to the router
pub struct Candidate {
    pub endpoint: Arc<dyn Endpoint>,
    pub model: String,
    pub priority: u32,
    pub healthy: bool,
    pub latency: Option<Duration>,
}

/// Owns the configured endpoint pool and its health state.
///
/// Endpoints are fixed for the life of the process; the ping loop refreshes
/// health and latency on a schedule.
pub struct EndpointRegistry {
    endpoints: Vec<RegisteredEndpoint>,
    health: RwLock<HashMap<usize, EndpointHealth>>,
}

impl EndpointRegistry {
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let mut endpoints = Vec::new();
        for endpoint_config in &config.endpoints {
            endpoints.push(build_registered(endpoint_config)?);
        }
        Ok(Self::new(endpoints))
    }

    fn new(endpoints: Vec<RegisteredEndpoint>) -> Self {
        let mut health = HashMap::new();
        for (index, registered) in endpoints.iter().enumerate() {
            health.insert(
                index,
                EndpointHealth {
                    // Optimistic until the first ping says otherwise
                    healthy: true,
                    latency: None,
                    last_checked: None,
                },
            );
            crate::metrics::update_endpoint_health(
                registered.endpoint.provider().as_str(),
                registered.endpoint.region(),
                &registered.model,
                true,
            );
        }

        Self {
            endpoints,
            health: RwLock::new(health),
        }
    }

    /// Endpoints able to serve `model`, with current health metadata.
    /// A `<name>@batch` model selects the deferred-execution twins.
    pub async fn candidates(&self, model: &str) -> Vec<Candidate> {
        let (bare_model, batch) = match strip_batch_suffix(model) {
            Some(bare) => (bare, true),
            None => (model, false),
        };

        let health = self.health.read().await;
        self.endpoints
            .iter()
            .enumerate()
            .filter(|(_, registered)| {
                registered.model == bare_model
                    || registered.aliases.iter().any(|alias| alias == bare_model)
            })
            .filter_map(|(index, registered)| {
                let endpoint = if batch {
                    registered.batch_endpoint.clone()?
                } else {
                    Arc::clone(&registered.endpoint)
                };
                let state = health.get(&index);
                Some(Candidate {
                    endpoint,
                    model: registered.model.clone(),
                    priority: registered.priority,
                    healthy: state.map(|s| s.healthy).unwrap_or(true),
                    latency: state.and_then(|s| s.latency),
                })
            })
            .collect()
    }

    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .endpoints
            .iter()
            .map(|registered| registered.model.clone())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// Ping every endpoint once, updating health and latency
    pub async fn ping_all(&self) {
        let results = futures::future::join_all(
            self.endpoints
                .iter()
                .map(|registered| registered.endpoint.ping()),
        )
        .await;

        let mut health = self.health.write().await;
        for (index, result) in results.into_iter().enumerate() {
            let registered = &self.endpoints[index];
            let entry = match health.get_mut(&index) {
                Some(entry) => entry,
                None => continue,
            };
            entry.last_checked = Some(Instant::now());
            match result {
                Ok(latency) => {
                    entry.healthy = true;
                    entry.latency = Some(latency);
                }
                Err(e) => {
                    entry.healthy = false;
                    entry.latency = None;
                    tracing::warn!(
                        provider = registered.endpoint.provider().as_str(),
                        region = registered.endpoint.region(),
                        model = %registered.model,
                        error = %e,
                        "Endpoint ping failed"
                    );
                }
            }
            crate::metrics::update_endpoint_health(
                registered.endpoint.provider().as_str(),
                registered.endpoint.region(),
                &registered.model,
                entry.healthy,
            );
        }
    }

    /// Background ping loop; exits when the registry is dropped elsewhere
    pub async fn ping_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.ping_all().await;
        }
    }

    /// Signal every adapter to terminate (drains batch coordinators)
    pub async fn shutdown(&self) {
        for registered in &self.endpoints {
            if let Some(batch) = &registered.batch_endpoint {
                if let Err(e) = batch.shutdown().await {
                    tracing::warn!(error = %e, "Batch endpoint shutdown failed");
                }
            }
            if let Err(e) = registered.endpoint.shutdown().await {
                tracing::warn!(error = %e, "Endpoint shutdown failed");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints_for_test(
        entries: Vec<(Arc<dyn Endpoint>, String, u32)>,
    ) -> Self {
        Self::new(
            entries
                .into_iter()
                .map(|(endpoint, model, priority)| RegisteredEndpoint {
                    endpoint,
                    batch_endpoint: None,
                    model,
                    aliases: vec![],
                    priority,
                })
                .collect(),
        )
    }

    #[cfg(test)]
    pub(crate) async fn mark_unhealthy_for_test(&self, index: usize) {
        if let Some(entry) = self.health.write().await.get_mut(&index) {
            entry.healthy = false;
        }
    }
}

fn build_registered(config: &EndpointConfig) -> Result<RegisteredEndpoint, GatewayError> {
    let provider: Provider = config.provider.parse()?;

    let endpoint: Arc<dyn Endpoint> = match provider {
        Provider::OpenAI | Provider::Groq | Provider::OpenRouter | Provider::HuggingFace => {
            Arc::new(OpenAiEndpoint::new(provider, config)?)
        }
        Provider::Azure => Arc::new(AzureEndpoint::new(config)?),
        Provider::Anthropic => Arc::new(AnthropicEndpoint::new(config)?),
        Provider::Studio => Arc::new(
            GeminiEndpoint::studio(config)?.with_image_fetcher(Arc::new(HttpImageFetcher::new()?)),
        ),
        Provider::Vertex => Arc::new(
            GeminiEndpoint::vertex(config)?.with_image_fetcher(Arc::new(HttpImageFetcher::new()?)),
        ),
        Provider::Bedrock => Arc::new(BedrockEndpoint::new(config)?),
        Provider::Cohere => Arc::new(CohereEndpoint::new(config)?),
    };

    // Deferred batching rides on the OpenAI files/batches APIs
    let batch_endpoint: Option<Arc<dyn Endpoint>> = if provider == Provider::OpenAI {
        Some(Arc::new(OpenAiBatchEndpoint::new(
            config,
            BatchConfig::default(),
        )?))
    } else {
        None
    };

    Ok(RegisteredEndpoint {
        endpoint,
        batch_endpoint,
        model: config.model.clone(),
        aliases: config.aliases.clone(),
        priority: config.priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterConfig, RoutingConfig};

    fn endpoint_config(provider: &str, model: &str) -> EndpointConfig {
        EndpointConfig {
            provider: provider.to_string(),
            region: "default".to_string(),
            model: model.to_string(),
            aliases: vec![format!("{}-alias", model)],
            upstream_model: None,
            api_key: "key".to_string(),
            base_url: None,
            timeout_seconds: 30,
            priority: 1,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_candidates_match_model_and_alias() {
        let config = Config {
            endpoints: vec![
                endpoint_config("openai", "gpt-4o"),
                endpoint_config("groq", "llama-3.3-70b"),
            ],
            routing: RoutingConfig::default(),
            limiter: LimiterConfig::default(),
        };
        let registry = EndpointRegistry::from_config(&config).unwrap();

        assert_eq!(registry.candidates("gpt-4o").await.len(), 1);
        assert_eq!(registry.candidates("gpt-4o-alias").await.len(), 1);
        assert_eq!(registry.candidates("llama-3.3-70b").await.len(), 1);
        assert!(registry.candidates("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_model_selects_batch_twin_for_openai_only() {
        let config = Config {
            endpoints: vec![
                endpoint_config("openai", "gpt-4o"),
                endpoint_config("groq", "llama-3.3-70b"),
            ],
            routing: RoutingConfig::default(),
            limiter: LimiterConfig::default(),
        };
        let registry = EndpointRegistry::from_config(&config).unwrap();

        assert_eq!(registry.candidates("gpt-4o@batch").await.len(), 1);
        assert!(registry.candidates("llama-3.3-70b@batch").await.is_empty());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_models_deduped_and_sorted() {
        let config = Config {
            endpoints: vec![
                endpoint_config("openai", "gpt-4o"),
                endpoint_config("azure", "gpt-4o"),
                endpoint_config("cohere", "command-r"),
            ],
            routing: RoutingConfig::default(),
            limiter: LimiterConfig::default(),
        };
        let mut config = config;
        config.endpoints[1].base_url = Some("https://r.openai.azure.com".to_string());

        let registry = EndpointRegistry::from_config(&config).unwrap();
        assert_eq!(registry.models(), vec!["command-r", "gpt-4o"]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = Config {
            endpoints: vec![endpoint_config("frontier", "model-x")],
            routing: RoutingConfig::default(),
            limiter: LimiterConfig::default(),
        };
        assert!(EndpointRegistry::from_config(&config).is_err());
    }
}
