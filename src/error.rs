use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Gateway error taxonomy
#[derive(Debug)]
pub enum GatewayError {
    /// Malformed or contradictory client request (never retried)
    InvalidRequest(String),
    /// Caller asked for a capability the adapter does not implement
    UnsupportedCapability { provider: String, capability: String },
    /// Upstream signalled quota exhaustion (HTTP 429 or quota error payload)
    QuotaExceeded(String),
    /// Retryable upstream failure (5xx, connection reset, timeout)
    TransientUpstream { status: Option<StatusCode>, message: String },
    /// Non-retryable upstream failure (4xx other than 429, unparseable response)
    FatalUpstream { status: StatusCode, message: String },
    /// Caller went away before the operation finished
    Cancelled,
    /// Shared cooldown store unreachable
    LimiterUnavailable(String),
    /// Every candidate endpoint was denied or disabled
    NoEndpointAvailable { retry_after: Duration },
    /// Configuration error
    Config(String),
    /// Protocol conversion error
    Conversion(String),
    /// HTTP request error (preserves reqwest::Error for transience detection)
    HttpRequest(reqwest::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::UnsupportedCapability { provider, capability } => {
                write!(f, "Provider '{}' does not support {}", provider, capability)
            }
            Self::QuotaExceeded(msg) => write!(f, "Quota exceeded: {}", msg),
            Self::TransientUpstream { status, message } => match status {
                Some(status) => write!(f, "Transient upstream error ({}): {}", status, message),
                None => write!(f, "Transient upstream error: {}", message),
            },
            Self::FatalUpstream { status, message } => {
                write!(f, "Upstream error ({}): {}", status, message)
            }
            Self::Cancelled => write!(f, "Request cancelled"),
            Self::LimiterUnavailable(msg) => write!(f, "Rate limiter unavailable: {}", msg),
            Self::NoEndpointAvailable { retry_after } => write!(
                f,
                "No endpoint available, retry after {:.3}s",
                retry_after.as_secs_f64()
            ),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Conversion(msg) => write!(f, "Conversion error: {}", msg),
            Self::HttpRequest(err) => write!(f, "HTTP request error: {}", err),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Stable machine-readable code for each error kind
pub fn error_code(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::InvalidRequest(_) => "invalid_request",
        GatewayError::UnsupportedCapability { .. } => "unsupported_capability",
        GatewayError::QuotaExceeded(_) => "quota_exceeded",
        GatewayError::TransientUpstream { .. } => "transient_upstream",
        GatewayError::FatalUpstream { .. } => "fatal_upstream",
        GatewayError::Cancelled => "cancelled",
        GatewayError::LimiterUnavailable(_) => "limiter_unavailable",
        GatewayError::NoEndpointAvailable { .. } => "no_endpoint_available",
        GatewayError::Config(_) => "config_error",
        GatewayError::Conversion(_) => "conversion_error",
        GatewayError::HttpRequest(_) => "http_request_error",
    }
}

/// Classify an upstream HTTP failure into the gateway taxonomy.
///
/// Status class decides first; the `"quota"` substring check on the error
/// body is the last resort, and this function is the only place it happens.
pub fn classify_upstream(status: StatusCode, body: &str) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::QuotaExceeded(body.to_string());
    }
    if status.is_server_error() {
        return GatewayError::TransientUpstream {
            status: Some(status),
            message: body.to_string(),
        };
    }
    if body.to_lowercase().contains("quota") {
        return GatewayError::QuotaExceeded(body.to_string());
    }
    GatewayError::FatalUpstream {
        status,
        message: body.to_string(),
    }
}

/// Whether this failure should arm the endpoint's cooldown before failover
pub fn is_quota_exceeded(error: &GatewayError) -> bool {
    matches!(error, GatewayError::QuotaExceeded(_))
}

/// Whether the router may fail over to the next candidate endpoint.
///
/// Quota and transient failures fail over; everything else surfaces
/// immediately to the caller.
pub fn is_failover_eligible(error: &GatewayError) -> bool {
    match error {
        GatewayError::QuotaExceeded(_) => true,
        GatewayError::TransientUpstream { .. } => true,
        GatewayError::HttpRequest(e) => {
            if e.is_connect() || e.is_timeout() {
                return true;
            }
            e.status().map(|s| s.is_server_error()).unwrap_or(false)
        }
        _ => false,
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpRequest(err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Conversion(format!("JSON error: {}", err))
    }
}
