//! GraphQL-over-HTTP remote table client.

use super::wire::{
    encode_key_bcs, DynamicFieldName, FieldNode, GraphqlRequest, GraphqlResponse, LookupData,
    LookupVariables, PageData, PageVariables, LOOKUP_QUERY, PAGE_QUERY,
};
use super::{LookupRequest, LookupResult, Page, PageRequest, RemoteTable};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::RemoteConfig;
use crate::error::{Error, RemoteError};
use crate::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Remote table client for a Sui-style GraphQL endpoint.
pub struct GraphqlTableClient {
    client: Client,
    endpoint: String,
    name_type: String,
    circuit_breaker: CircuitBreaker,
}

impl GraphqlTableClient {
    /// Build a client from configuration.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (key, value) in &config.custom_headers {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name '{}': {}", key, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for header '{}': {}", key, e)))?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .pool_max_idle_per_host(config.connection_pool_size)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            name_type: config.name_type.clone(),
            circuit_breaker: CircuitBreaker::new("remote-table", &config.circuit_breaker),
        })
    }

    /// State of the endpoint's circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn execute<V, T>(&self, query: &str, variables: V) -> Result<T>
    where
        V: Serialize + Send + Sync,
        T: DeserializeOwned,
    {
        let request = GraphqlRequest { query, variables };
        let body = self
            .circuit_breaker
            .call(|| async {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| RemoteError::RequestFailed {
                        endpoint: self.endpoint.clone(),
                        message: e.to_string(),
                    })?;

                let status = response.status();
                let body = response.text().await.map_err(|e| RemoteError::RequestFailed {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                })?;
                if !status.is_success() {
                    return Err(RemoteError::HttpStatus {
                        status: status.as_u16(),
                        body: truncate(&body, 512),
                    }
                    .into());
                }
                Ok::<_, Error>(body)
            })
            .await?;
        trace!(bytes = body.len(), "GraphQL response received");

        let response: GraphqlResponse<T> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        if !response.errors.is_empty() {
            let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(RemoteError::QueryErrors(messages.join("; ")).into());
        }
        response
            .data
            .ok_or_else(|| RemoteError::MalformedResponse("response has no data".into()).into())
    }
}

#[async_trait]
impl RemoteTable for GraphqlTableClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let variables = PageVariables {
            parent_id: &request.parent_id,
            first: request.page_size,
            after: request.cursor.as_deref(),
        };
        let data: PageData = self.execute(PAGE_QUERY, variables).await?;

        let Some(owner) = data.owner else {
            return Err(RemoteError::MalformedResponse(format!(
                "table {} not found",
                request.parent_id
            ))
            .into());
        };
        let connection = owner.dynamic_fields;
        debug!(
            nodes = connection.nodes.len(),
            has_next_page = connection.page_info.has_next_page,
            "Fetched page"
        );
        Ok(Page {
            nodes: connection.nodes.into_iter().map(FieldNode::into_raw).collect(),
            has_next_page: connection.page_info.has_next_page,
            end_cursor: connection.page_info.end_cursor,
        })
    }

    async fn lookup(&self, request: &LookupRequest) -> Result<LookupResult> {
        let variables = LookupVariables {
            parent_id: &request.parent_id,
            name: DynamicFieldName {
                type_: self.name_type.clone(),
                bcs: encode_key_bcs(&request.key_labels),
            },
        };
        let data: LookupData = self.execute(LOOKUP_QUERY, variables).await?;

        let expiration_raw = data
            .owner
            .and_then(|o| o.dynamic_field)
            .and_then(|f| f.value)
            .and_then(|v| v.expiration_raw());
        Ok(LookupResult { expiration_raw })
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerSettings;
    use std::collections::HashMap;

    fn config(endpoint: &str) -> RemoteConfig {
        RemoteConfig {
            endpoint: endpoint.into(),
            parent_id: "0xtable".into(),
            name_type: "0x2::domain::Domain".into(),
            root_label: "sui".into(),
            page_size: 50,
            request_timeout_seconds: 2,
            connection_pool_size: 2,
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 1,
                reset_timeout_seconds: 60,
                success_threshold: 1,
            },
            custom_headers: HashMap::new(),
        }
    }

    #[test]
    fn test_rejects_invalid_header() {
        let mut cfg = config("http://127.0.0.1:1/graphql");
        cfg.custom_headers
            .insert("bad header".into(), "value".into());
        assert!(matches!(GraphqlTableClient::new(&cfg), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_opens_circuit() {
        let client = GraphqlTableClient::new(&config("http://127.0.0.1:1/graphql")).unwrap();
        let request = PageRequest {
            parent_id: "0xtable".into(),
            cursor: None,
            page_size: 10,
        };

        let err = client.fetch_page(&request).await.unwrap_err();
        assert!(matches!(err, Error::Remote(RemoteError::RequestFailed { .. })));
        assert_eq!(client.circuit_state(), CircuitState::Open);

        // Fails fast without touching the network
        let err = client.fetch_page(&request).await.unwrap_err();
        assert!(matches!(err, Error::Remote(RemoteError::CircuitOpen(_))));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        // Never splits a multi-byte character
        assert_eq!(truncate("aé", 2), "a...");
    }
}
