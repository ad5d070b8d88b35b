use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::UpstreamError;

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

/// Minimal JSON-RPC 2.0 client shared by the ledger and relay clients.
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        Self::with_headers(endpoint, timeout, HeaderMap::new())
    }

    pub fn with_headers(
        endpoint: Url,
        timeout: Duration,
        headers: HeaderMap,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|source| UpstreamError::Http {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, UpstreamError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_at(&self.endpoint, method, params).await
    }

    /// Same as `call` but against another path on the same host.
    pub async fn call_at<P, R>(&self, url: &Url, method: &str, params: P) -> Result<R, UpstreamError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("-> {} {}", method, url);

        // RPC urls often carry an api key in the query string
        let endpoint = format!("{}{}", url.origin().ascii_serialization(), url.path());
        let http_err = |source: reqwest::Error| UpstreamError::Http {
            endpoint: endpoint.clone(),
            source: source.without_url(),
        };

        let response = self
            .http
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;

        let body: RpcResponse<R> = response.json().await.map_err(http_err)?;

        if let Some(err) = body.error {
            return Err(UpstreamError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        body.result.ok_or_else(|| UpstreamError::Decode {
            method: method.to_string(),
            reason: "response carried neither result nor error".to_string(),
        })
    }
}

/// Build a header map from static name / runtime value pairs, skipping values
/// that are not valid header text.
pub fn header_map(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "getSlot",
            params: [serde_json::json!({ "commitment": "confirmed" })],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "getSlot");
        assert_eq!(value["params"][0]["commitment"], "confirmed");
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_error_response_decodes() {
        let body: RpcResponse<u64> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"Node is behind"}}"#,
        )
        .unwrap();
        assert!(body.result.is_none());
        assert_eq!(body.error.unwrap().code, -32005);
    }

    #[test]
    fn test_header_map_skips_invalid_values() {
        let headers = header_map(&[("x-jito-auth", "abc"), ("authorization", "bad\nvalue")]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-jito-auth").unwrap(), "abc");
    }
}
