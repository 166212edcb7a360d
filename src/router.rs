use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{is_failover_eligible, is_quota_exceeded, GatewayError};
use crate::limiter::RateLimiter;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::registry::{Candidate, EndpointRegistry};
use crate::streaming::ChunkStream;

/// Dispatches client requests to concrete endpoints.
///
/// Selection: healthy candidates ordered by priority, then observed ping
/// latency, then a stable provider/region key, so ordering is
/// deterministic given equal health. Each candidate must pass limiter
/// admission before dispatch; quota failures arm the endpoint cooldown and
/// fail over to the next candidate.
pub struct Router {
    registry: Arc<EndpointRegistry>,
    limiter: Arc<dyn RateLimiter>,
    cooldown: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        limiter: Arc<dyn RateLimiter>,
        cooldown: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            cooldown,
        }
    }

    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        validate_model_name(&request.model)?;
        request.validate()?;

        let candidates = self.select_candidates(&request.model).await?;
        let mut shortest_retry: Option<Duration> = None;

        for candidate in &candidates {
            let admission = self
                .limiter
                .admit(
                    candidate.endpoint.provider().as_str(),
                    candidate.endpoint.region(),
                    &candidate.model,
                    self.cooldown,
                )
                .await?;
            if !admission.allowed {
                shortest_retry = Some(
                    shortest_retry
                        .map(|current| current.min(admission.retry_after))
                        .unwrap_or(admission.retry_after),
                );
                continue;
            }

            let started = Instant::now();
            match candidate.endpoint.generate_chat_completion(request).await {
                Ok(response) => {
                    self.record_outcome(candidate, "success");
                    crate::metrics::record_duration(
                        candidate.endpoint.provider().as_str(),
                        candidate.endpoint.region(),
                        &candidate.model,
                        started.elapsed(),
                    );
                    return Ok(self.finalize(response, candidate));
                }
                Err(e) => {
                    if let Some(retry) = self.handle_dispatch_error(candidate, &e).await? {
                        shortest_retry = Some(
                            shortest_retry.map(|current| current.min(retry)).unwrap_or(retry),
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(GatewayError::NoEndpointAvailable {
            retry_after: shortest_retry.unwrap_or(self.cooldown),
        })
    }

    pub async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        validate_model_name(&request.model)?;
        request.validate()?;

        let candidates = self.select_candidates(&request.model).await?;
        let mut shortest_retry: Option<Duration> = None;

        for candidate in &candidates {
            let admission = self
                .limiter
                .admit(
                    candidate.endpoint.provider().as_str(),
                    candidate.endpoint.region(),
                    &candidate.model,
                    self.cooldown,
                )
                .await?;
            if !admission.allowed {
                shortest_retry = Some(
                    shortest_retry
                        .map(|current| current.min(admission.retry_after))
                        .unwrap_or(admission.retry_after),
                );
                continue;
            }

            match candidate
                .endpoint
                .generate_chat_completion_stream(request)
                .await
            {
                Ok(stream) => {
                    self.record_outcome(candidate, "success");
                    return Ok(stream);
                }
                Err(e) => {
                    if let Some(retry) = self.handle_dispatch_error(candidate, &e).await? {
                        shortest_retry = Some(
                            shortest_retry.map(|current| current.min(retry)).unwrap_or(retry),
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(GatewayError::NoEndpointAvailable {
            retry_after: shortest_retry.unwrap_or(self.cooldown),
        })
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    async fn select_candidates(&self, model: &str) -> Result<Vec<Candidate>, GatewayError> {
        let mut candidates = self.registry.candidates(model).await;
        if candidates.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "model '{}' is not served by any configured endpoint",
                model
            )));
        }

        candidates.retain(|candidate| candidate.healthy);
        if candidates.is_empty() {
            return Err(GatewayError::NoEndpointAvailable {
                retry_after: self.cooldown,
            });
        }

        order_candidates(&mut candidates);
        Ok(candidates)
    }

    /// Returns Some(retry hint) when the router should fail over, None when
    /// the error must surface to the caller
    async fn handle_dispatch_error(
        &self,
        candidate: &Candidate,
        error: &GatewayError,
    ) -> Result<Option<Duration>, GatewayError> {
        if is_quota_exceeded(error) {
            self.record_outcome(candidate, "quota");
            crate::metrics::record_cooldown(
                candidate.endpoint.provider().as_str(),
                candidate.endpoint.region(),
                &candidate.model,
            );
            tracing::warn!(
                provider = candidate.endpoint.provider().as_str(),
                region = candidate.endpoint.region(),
                model = %candidate.model,
                cooldown_seconds = self.cooldown.as_secs(),
                "Endpoint quota exceeded, arming cooldown and failing over"
            );
            self.limiter
                .disable(
                    candidate.endpoint.provider().as_str(),
                    candidate.endpoint.region(),
                    &candidate.model,
                    self.cooldown,
                )
                .await?;
            return Ok(Some(self.cooldown));
        }

        if is_failover_eligible(error) {
            self.record_outcome(candidate, "failure");
            tracing::warn!(
                provider = candidate.endpoint.provider().as_str(),
                region = candidate.endpoint.region(),
                model = %candidate.model,
                error = %error,
                "Transient endpoint failure, trying next candidate"
            );
            return Ok(Some(self.cooldown));
        }

        self.record_outcome(candidate, "failure");
        Ok(None)
    }

    fn record_outcome(&self, candidate: &Candidate, outcome: &str) {
        crate::metrics::record_request(
            candidate.endpoint.provider().as_str(),
            candidate.endpoint.region(),
            &candidate.model,
            outcome,
        );
    }

    /// Stamp the stable response contract: fresh id, current timestamp,
    /// and the serving endpoint's fingerprint
    fn finalize(
        &self,
        mut response: ChatCompletionResponse,
        candidate: &Candidate,
    ) -> ChatCompletionResponse {
        response.id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        response.created = chrono::Utc::now().timestamp() as u64;
        response.object = "chat.completion".to_string();
        response.system_fingerprint = Some(format!(
            "open-gemini/{}/{}/{}",
            candidate.endpoint.provider().as_str(),
            candidate.endpoint.region(),
            candidate.model
        ));
        response
    }
}

/// Healthy-first is already enforced; order by priority, then latency
/// (unmeasured last), then a stable key
fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| {
                let a_latency = a.latency.unwrap_or(Duration::MAX);
                let b_latency = b.latency.unwrap_or(Duration::MAX);
                a_latency.cmp(&b_latency)
            })
            .then_with(|| {
                let a_key = (a.endpoint.provider().as_str(), a.endpoint.region().to_string());
                let b_key = (b.endpoint.provider().as_str(), b.endpoint.region().to_string());
                a_key.cmp(&b_key)
            })
    });
}

/// Reject model names that could not be a configured route
fn validate_model_name(model: &str) -> Result<(), GatewayError> {
    if model.is_empty() || model.len() > 256 {
        return Err(GatewayError::InvalidRequest(
            "model name must be between 1 and 256 characters".to_string(),
        ));
    }

    let valid = model
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | ':' | '@' | '/'));
    if !valid {
        return Err(GatewayError::InvalidRequest(format!(
            "invalid model name '{}'",
            model
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::MemoryLimiter;
    use crate::models::openai::{ChatChoice, ChatMessage, MessageContent, Usage};
    use crate::providers::{Endpoint, Provider};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct ScriptedEndpoint {
        provider: Provider,
        region: String,
        results: Mutex<VecDeque<Result<ChatCompletionResponse, GatewayError>>>,
    }

    impl ScriptedEndpoint {
        fn new(
            provider: Provider,
            region: &str,
            results: Vec<Result<ChatCompletionResponse, GatewayError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                provider,
                region: region.to_string(),
                results: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl Endpoint for ScriptedEndpoint {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn region(&self) -> &str {
            &self.region
        }

        async fn generate_chat_completion(
            &self,
            _request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, GatewayError> {
            self.results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Cancelled))
        }

        async fn generate_chat_completion_stream(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<ChunkStream, GatewayError> {
            let response = self.generate_chat_completion(request).await?;
            Ok(crate::streaming::emulate_stream(response))
        }

        async fn ping(&self) -> Result<Duration, GatewayError> {
            Ok(Duration::from_millis(1))
        }
    }

    fn ok_response(content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-upstream".to_string(),
            object: "chat.completion".to_string(),
            created: 1,
            model: "gpt-4o".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(MessageContent::Text(content.to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    function_call: None,
                    refusal: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
            system_fingerprint: None,
        }
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("ping")],
            ..Default::default()
        }
    }

    fn router_with(endpoints: Vec<(Arc<dyn Endpoint>, &str)>) -> Router {
        let registry = Arc::new(EndpointRegistry::with_endpoints_for_test(
            endpoints
                .into_iter()
                .map(|(endpoint, model)| (endpoint, model.to_string(), 1))
                .collect(),
        ));
        Router::new(
            registry,
            Arc::new(MemoryLimiter::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_finalization_contract() {
        let endpoint = ScriptedEndpoint::new(
            Provider::OpenAI,
            "default",
            vec![Ok(ok_response("pong"))],
        );
        let router = router_with(vec![(endpoint as Arc<dyn Endpoint>, "gpt-4o")]);

        let response = router.chat_completion(&request()).await.unwrap();

        let hex = response.id.strip_prefix("chatcmpl-").unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(response.object, "chat.completion");
        assert_eq!(
            response.system_fingerprint.as_deref(),
            Some("open-gemini/openai/default/gpt-4o")
        );
    }

    #[tokio::test]
    async fn test_failover_on_quota_disables_endpoint() {
        let first = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-east-1",
            vec![Err(GatewayError::QuotaExceeded("out of quota".to_string()))],
        );
        let second = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-west-2",
            vec![Ok(ok_response("pong"))],
        );
        let router = router_with(vec![
            (first as Arc<dyn Endpoint>, "gpt-4o"),
            (second as Arc<dyn Endpoint>, "gpt-4o"),
        ]);

        let response = router.chat_completion(&request()).await.unwrap();
        assert_eq!(
            response.system_fingerprint.as_deref(),
            Some("open-gemini/openai/us-west-2/gpt-4o")
        );

        // The failed endpoint's cooldown is armed
        let admission = router
            .limiter
            .admit("openai", "us-east-1", "gpt-4o", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!admission.allowed);
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_immediately() {
        let first = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-east-1",
            vec![Err(GatewayError::FatalUpstream {
                status: StatusCode::BAD_REQUEST,
                message: "bad request".to_string(),
            })],
        );
        let second = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-west-2",
            vec![Ok(ok_response("never reached"))],
        );
        let router = router_with(vec![
            (first as Arc<dyn Endpoint>, "gpt-4o"),
            (second as Arc<dyn Endpoint>, "gpt-4o"),
        ]);

        let err = router.chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::FatalUpstream { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_candidates_return_retry_hint() {
        let endpoint = ScriptedEndpoint::new(Provider::OpenAI, "default", vec![]);
        let router = router_with(vec![(endpoint as Arc<dyn Endpoint>, "gpt-4o")]);

        // Consume the admission slot so the next request is denied
        router
            .limiter
            .admit("openai", "default", "gpt-4o", Duration::from_secs(5))
            .await
            .unwrap();

        let err = router.chat_completion(&request()).await.unwrap_err();
        match err {
            GatewayError::NoEndpointAvailable { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(5));
            }
            other => panic!("expected NoEndpointAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_model_is_invalid_request() {
        let endpoint = ScriptedEndpoint::new(Provider::OpenAI, "default", vec![]);
        let router = router_with(vec![(endpoint as Arc<dyn Endpoint>, "gpt-4o")]);

        let mut bad_request = request();
        bad_request.model = "unknown-model".to_string();
        let err = router.chat_completion(&bad_request).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unhealthy_endpoints_are_skipped() {
        let first = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-east-1",
            vec![Ok(ok_response("from first"))],
        );
        let second = ScriptedEndpoint::new(
            Provider::OpenAI,
            "us-west-2",
            vec![Ok(ok_response("from second"))],
        );
        let registry = Arc::new(EndpointRegistry::with_endpoints_for_test(vec![
            (first as Arc<dyn Endpoint>, "gpt-4o".to_string(), 1),
            (second as Arc<dyn Endpoint>, "gpt-4o".to_string(), 1),
        ]));
        registry.mark_unhealthy_for_test(0).await;

        let router = Router::new(
            registry,
            Arc::new(MemoryLimiter::new()),
            Duration::from_secs(5),
        );

        let response = router.chat_completion(&request()).await.unwrap();
        assert_eq!(
            response.system_fingerprint.as_deref(),
            Some("open-gemini/openai/us-west-2/gpt-4o")
        );
    }

    #[test]
    fn test_validate_model_name() {
        assert!(validate_model_name("gpt-4o").is_ok());
        assert!(validate_model_name("gpt-4o@batch").is_ok());
        assert!(validate_model_name("anthropic.claude-3-sonnet-v1:0").is_ok());
        assert!(validate_model_name("").is_err());
        assert!(validate_model_name("model name with spaces").is_err());
    }
}
