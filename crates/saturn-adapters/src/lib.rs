//! Adapter Registry (C5): maps a `service_slug` to the three-method
//! contract the proxy executor drives every call through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use saturn_core::{AuthType, Service};
use serde_json::Value;

/// Inbound call to quote or execute, as the executor assembles it from the
/// inbound HTTP request.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub operation: String,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct AdapterQuote {
    pub operation: String,
    pub quoted_sats: u64,
}

#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub status: u16,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport error calling upstream: {0}")]
    Transport(String),
    #[error("adapter misconfigured: {0}")]
    Misconfigured(String),
}

/// The three-method contract every service adapter satisfies. `quote` is
/// synchronous in spirit (pure given current pricing) but kept `async`
/// here so both curated and community adapters share one trait object
/// shape.
#[async_trait]
pub trait AdapterContract: Send + Sync {
    async fn quote(&self, request: &AdapterRequest) -> Result<AdapterQuote, AdapterError>;

    /// Performs the upstream call. MUST apply a 30s timeout. MUST NOT
    /// error on a non-2xx upstream response — only transport failures
    /// (DNS, TCP, TLS, timeout) are `Err`.
    async fn execute(&self, request: &AdapterRequest) -> Result<AdapterResponse, AdapterError>;

    /// Maps upstream usage telemetry back to cost. Contract:
    /// `final_sats <= quoted_sats` always.
    async fn finalize(
        &self,
        response: &AdapterResponse,
        quoted_sats: u64,
    ) -> Result<u64, AdapterError>;
}

pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers a caller can never set directly — either auth-adjacent or
/// otherwise owned by the adapter/transport.
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "x-api-key",
    "cookie",
    "transfer-encoding",
];

fn validate_auth_credential_env(name: &str) -> Result<(), AdapterError> {
    let re = regex::Regex::new(r"^[A-Z][A-Z0-9_]*_(API_KEY|API_TOKEN)$")
        .map_err(|error| AdapterError::Misconfigured(error.to_string()))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(AdapterError::Misconfigured(format!(
            "auth_credential_env {name} does not match the ^[A-Z][A-Z0-9_]*_(API_KEY|API_TOKEN)$ pattern"
        )))
    }
}

fn validate_path(path: &str) -> Result<(), AdapterError> {
    if path.contains("..") || path.contains("://") || path.starts_with("//") {
        return Err(AdapterError::InvalidRequest(format!(
            "path {path} is not allowed"
        )));
    }
    Ok(())
}

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Realizes any community service purely from its `Service` row:
/// `{base_url, auth_type, auth_credential_env}`. This is the fallback
/// adapter for services that don't warrant bespoke request/response
/// shaping.
pub struct GenericHttp {
    service: Service,
    credential: String,
    http: reqwest::Client,
}

impl GenericHttp {
    /// Construct a `GenericHttp` adapter. Enforces the
    /// `auth_credential_env` naming convention so operators cannot
    /// approve a community service that exfiltrates an arbitrary
    /// environment variable.
    pub fn new(service: Service, credential: String) -> Result<Self, AdapterError> {
        validate_auth_credential_env(&service.auth_credential_env)?;
        let http = reqwest::Client::builder()
            .timeout(EXECUTE_TIMEOUT)
            .build()
            .map_err(|error| AdapterError::Misconfigured(error.to_string()))?;
        Ok(Self {
            service,
            credential,
            http,
        })
    }

    fn base_host(&self) -> Result<String, AdapterError> {
        reqwest::Url::parse(&self.service.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| {
                AdapterError::Misconfigured(format!(
                    "base_url {} has no parseable hostname",
                    self.service.base_url
                ))
            })
    }

    fn build_request(
        &self,
        request: &AdapterRequest,
    ) -> Result<reqwest::RequestBuilder, AdapterError> {
        validate_path(&request.path)?;
        let method = request.method.to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(AdapterError::InvalidRequest(format!(
                "method {method} is not allowed"
            )));
        }

        let url = format!(
            "{}/{}",
            self.service.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let resolved = reqwest::Url::parse(&url)
            .map_err(|error| AdapterError::InvalidRequest(error.to_string()))?;
        let expected_host = self.base_host()?;
        if resolved.host_str() != Some(expected_host.as_str()) {
            return Err(AdapterError::InvalidRequest(
                "resolved url escapes the configured base_url host".to_string(),
            ));
        }

        let mut builder = self.http.request(
            method
                .parse()
                .map_err(|_| AdapterError::InvalidRequest(format!("bad method {method}")))?,
            resolved,
        );

        for (key, value) in &request.headers {
            if STRIPPED_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.header(key, value);
        }

        builder = match self.service.auth_type {
            AuthType::Bearer => builder.bearer_auth(&self.credential),
            AuthType::ApiKeyHeader => builder.header("x-api-key", &self.credential),
            AuthType::Basic => builder.basic_auth(&self.credential, Option::<&str>::None),
            AuthType::QueryParam => builder.query(&[("api_key", &self.credential)]),
        };

        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        Ok(builder)
    }
}

#[async_trait]
impl AdapterContract for GenericHttp {
    async fn quote(&self, request: &AdapterRequest) -> Result<AdapterQuote, AdapterError> {
        Ok(AdapterQuote {
            operation: request.operation.clone(),
            quoted_sats: 0,
        })
    }

    async fn execute(&self, request: &AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        let builder = self.build_request(request)?;
        let response = builder
            .send()
            .await
            .map_err(|error| AdapterError::Transport(error.to_string()))?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        let data = response
            .json::<Value>()
            .await
            .unwrap_or(Value::Null);

        Ok(AdapterResponse {
            status,
            data,
            headers,
        })
    }

    async fn finalize(
        &self,
        _response: &AdapterResponse,
        quoted_sats: u64,
    ) -> Result<u64, AdapterError> {
        Ok(quoted_sats)
    }
}

/// Curated adapters ship bespoke quote/finalize logic tuned to a
/// provider's own metered units (e.g. per-token pricing); they still
/// delegate transport to a plain `reqwest::Client`.
pub mod curated {
    use super::{
        AdapterContract, AdapterError, AdapterQuote, AdapterRequest, AdapterResponse,
        EXECUTE_TIMEOUT,
    };
    use async_trait::async_trait;
    use serde_json::Value;

    /// A chat-completion style LLM adapter, priced per 1k tokens of
    /// combined input+output usage reported in the response body.
    pub struct OpenAiCompatible {
        base_url: String,
        api_key: String,
        price_sats_per_1k_tokens: u64,
        http: reqwest::Client,
    }

    impl OpenAiCompatible {
        pub fn new(
            base_url: String,
            api_key: String,
            price_sats_per_1k_tokens: u64,
        ) -> Result<Self, AdapterError> {
            let http = reqwest::Client::builder()
                .timeout(EXECUTE_TIMEOUT)
                .build()
                .map_err(|error| AdapterError::Misconfigured(error.to_string()))?;
            Ok(Self {
                base_url,
                api_key,
                price_sats_per_1k_tokens,
                http,
            })
        }
    }

    #[async_trait]
    impl AdapterContract for OpenAiCompatible {
        async fn quote(&self, request: &AdapterRequest) -> Result<AdapterQuote, AdapterError> {
            let estimated_tokens = request
                .body
                .get("messages")
                .and_then(Value::as_array)
                .map(|messages| messages.len() * 200)
                .unwrap_or(500) as u64;
            let quoted_sats =
                (estimated_tokens * self.price_sats_per_1k_tokens).div_ceil(1_000);
            Ok(AdapterQuote {
                operation: request.operation.clone(),
                quoted_sats,
            })
        }

        async fn execute(
            &self,
            request: &AdapterRequest,
        ) -> Result<AdapterResponse, AdapterError> {
            let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
            let response = self
                .http
                .post(url)
                .bearer_auth(&self.api_key)
                .json(&request.body)
                .send()
                .await
                .map_err(|error| AdapterError::Transport(error.to_string()))?;
            let status = response.status().as_u16();
            let data = response.json::<Value>().await.unwrap_or(Value::Null);
            Ok(AdapterResponse {
                status,
                data,
                headers: Default::default(),
            })
        }

        async fn finalize(
            &self,
            response: &AdapterResponse,
            quoted_sats: u64,
        ) -> Result<u64, AdapterError> {
            let total_tokens = response
                .data
                .get("usage")
                .and_then(|usage| usage.get("total_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let final_sats =
                (total_tokens * self.price_sats_per_1k_tokens).div_ceil(1_000);
            Ok(final_sats.min(quoted_sats))
        }
    }

    /// A flat-rate search adapter: quote and finalize are identical since
    /// the provider bills per request regardless of result count.
    pub struct FlatRateSearch {
        base_url: String,
        api_key: String,
        price_sats_per_request: u64,
        http: reqwest::Client,
    }

    impl FlatRateSearch {
        pub fn new(
            base_url: String,
            api_key: String,
            price_sats_per_request: u64,
        ) -> Result<Self, AdapterError> {
            let http = reqwest::Client::builder()
                .timeout(EXECUTE_TIMEOUT)
                .build()
                .map_err(|error| AdapterError::Misconfigured(error.to_string()))?;
            Ok(Self {
                base_url,
                api_key,
                price_sats_per_request,
                http,
            })
        }
    }

    #[async_trait]
    impl AdapterContract for FlatRateSearch {
        async fn quote(&self, request: &AdapterRequest) -> Result<AdapterQuote, AdapterError> {
            Ok(AdapterQuote {
                operation: request.operation.clone(),
                quoted_sats: self.price_sats_per_request,
            })
        }

        async fn execute(
            &self,
            request: &AdapterRequest,
        ) -> Result<AdapterResponse, AdapterError> {
            let url = format!("{}/search", self.base_url.trim_end_matches('/'));
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.api_key)
                .query(&[("q", request.body.get("query").and_then(Value::as_str).unwrap_or(""))])
                .send()
                .await
                .map_err(|error| AdapterError::Transport(error.to_string()))?;
            let status = response.status().as_u16();
            let data = response.json::<Value>().await.unwrap_or(Value::Null);
            Ok(AdapterResponse {
                status,
                data,
                headers: Default::default(),
            })
        }

        async fn finalize(
            &self,
            _response: &AdapterResponse,
            quoted_sats: u64,
        ) -> Result<u64, AdapterError> {
            Ok(quoted_sats.min(self.price_sats_per_request))
        }
    }
}

/// Maps `service_slug` -> adapter. Lookups hand back a cheap `Arc` clone
/// so the executor can hold one across an `await` without borrowing the
/// registry.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn AdapterContract>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service_slug: impl Into<String>, adapter: Arc<dyn AdapterContract>) {
        self.adapters.insert(service_slug.into(), adapter);
    }

    #[must_use]
    pub fn resolve(&self, service_slug: &str) -> Option<Arc<dyn AdapterContract>> {
        self.adapters.get(service_slug).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_auth_credential_env, validate_path};

    #[test]
    fn auth_credential_env_must_end_in_api_key_or_api_token() {
        assert!(validate_auth_credential_env("OPENAI_API_KEY").is_ok());
        assert!(validate_auth_credential_env("ANTHROPIC_API_TOKEN").is_ok());
        assert!(validate_auth_credential_env("OPENAI_SECRET").is_err());
        assert!(validate_auth_credential_env("path_API_KEY").is_err());
    }

    #[test]
    fn path_rejects_traversal_and_absolute_redirects() {
        assert!(validate_path("/v1/chat").is_ok());
        assert!(validate_path("/../secrets").is_err());
        assert!(validate_path("http://evil.example/x").is_err());
        assert!(validate_path("//evil.example/x").is_err());
    }
}
