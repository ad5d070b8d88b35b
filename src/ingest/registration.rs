use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};
use url::Url;

use crate::error::UpstreamError;

pub const HELIUS_API_BASE: &str = "https://api.helius.xyz";

/// Webhook definition as exchanged with the Helius webhook API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDefinition {
    #[serde(rename = "webhookID", default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(rename = "webhookURL")]
    pub webhook_url: String,
    #[serde(default)]
    pub transaction_types: Vec<String>,
    #[serde(default)]
    pub account_addresses: Vec<String>,
    pub webhook_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

/// Keeps an enhanced webhook for the launchpad program pointed at our
/// ingress URL.
pub struct HeliusWebhookRegistrar {
    http: reqwest::Client,
    api_base: Url,
    api_key: String,
}

impl HeliusWebhookRegistrar {
    pub fn new(api_base: Url, api_key: impl Into<String>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|source| UpstreamError::Http {
                endpoint: api_base.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            api_base,
            api_key: api_key.into(),
        })
    }

    /// Edit the matching webhook if one exists, otherwise create it.
    /// Returns the webhook id.
    pub async fn ensure(
        &self,
        webhook_url: &str,
        program_id: &str,
        auth_header: Option<&str>,
    ) -> Result<String, UpstreamError> {
        info!(
            "🔗 Configuring Helius webhook for program {} -> {}",
            program_id, webhook_url
        );

        let desired = WebhookDefinition {
            webhook_id: None,
            webhook_url: webhook_url.to_string(),
            transaction_types: vec!["ANY".to_string()],
            account_addresses: vec![program_id.to_string()],
            webhook_type: "enhanced".to_string(),
            auth_header: auth_header.map(str::to_string),
        };

        let existing = self.list().await?;
        let saved: WebhookDefinition = match find_matching(&existing, webhook_url, program_id) {
            Some(current) => {
                let id = current.webhook_id.clone().unwrap_or_default();
                info!("Found existing enhanced webhook {}, updating", id);
                let url = self.endpoint(&format!("/v0/webhooks/{}", id))?;
                self.send(self.http.put(url.clone()).json(&desired), &url).await?
            }
            None => {
                info!("Creating new enhanced webhook");
                let url = self.endpoint("/v0/webhooks")?;
                self.send(self.http.post(url.clone()).json(&desired), &url).await?
            }
        };

        let id = saved.webhook_id.unwrap_or_default();
        info!("✅ Helius webhook {} active", id);
        Ok(id)
    }

    /// Same as `ensure` but only logs failures; ingestion keeps working with a
    /// manually configured webhook.
    pub async fn ensure_or_log(&self, webhook_url: &str, program_id: &str, auth_header: Option<&str>) {
        if let Err(e) = self.ensure(webhook_url, program_id, auth_header).await {
            error!("❌ Failed to create or update Helius webhook: {}", e);
        }
    }

    async fn list(&self) -> Result<Vec<WebhookDefinition>, UpstreamError> {
        let url = self.endpoint("/v0/webhooks")?;
        self.send(self.http.get(url.clone()), &url).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        let mut url = self.api_base.join(path).map_err(|e| UpstreamError::Decode {
            method: "webhooks".to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("api-key", &self.api_key);
        Ok(url)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<T, UpstreamError> {
        // Never log or surface the api key
        let endpoint = format!("{}{}", url.origin().ascii_serialization(), url.path());
        let http_err = |source: reqwest::Error| UpstreamError::Http {
            endpoint: endpoint.clone(),
            source: source.without_url(),
        };
        request
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?
            .json()
            .await
            .map_err(http_err)
    }
}

/// Enhanced webhook already delivering the program's activity to `webhook_url`.
pub fn find_matching<'a>(
    webhooks: &'a [WebhookDefinition],
    webhook_url: &str,
    program_id: &str,
) -> Option<&'a WebhookDefinition> {
    webhooks.iter().find(|wh| {
        wh.webhook_url == webhook_url
            && wh.account_addresses.iter().any(|a| a == program_id)
            && wh.webhook_type.eq_ignore_ascii_case("enhanced")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

    #[test]
    fn test_list_response_decodes_and_matches() {
        let raw = format!(
            r#"[
                {{"webhookID":"w1","wallet":"x","webhookURL":"https://bot.example/webhooks/helius",
                  "transactionTypes":["ANY"],"accountAddresses":["{p}"],"webhookType":"raw"}},
                {{"webhookID":"w2","wallet":"x","webhookURL":"https://bot.example/webhooks/helius",
                  "transactionTypes":["ANY"],"accountAddresses":["{p}"],"webhookType":"enhanced"}},
                {{"webhookID":"w3","wallet":"x","webhookURL":"https://other.example/hook",
                  "transactionTypes":["ANY"],"accountAddresses":["{p}"],"webhookType":"enhanced"}}
            ]"#,
            p = PROGRAM
        );
        let hooks: Vec<WebhookDefinition> = serde_json::from_str(&raw).unwrap();
        let found = find_matching(&hooks, "https://bot.example/webhooks/helius", PROGRAM).unwrap();
        assert_eq!(found.webhook_id.as_deref(), Some("w2"));
        assert!(find_matching(&hooks, "https://bot.example/webhooks/helius", "other").is_none());
    }

    #[test]
    fn test_create_body_shape() {
        let body = serde_json::to_value(WebhookDefinition {
            webhook_id: None,
            webhook_url: "https://bot.example/webhooks/helius".into(),
            transaction_types: vec!["ANY".into()],
            account_addresses: vec![PROGRAM.into()],
            webhook_type: "enhanced".into(),
            auth_header: Some("secret".into()),
        })
        .unwrap();
        assert_eq!(body["webhookURL"], "https://bot.example/webhooks/helius");
        assert_eq!(body["authHeader"], "secret");
        assert!(body.get("webhookID").is_none());
    }

    #[test]
    fn test_endpoint_carries_api_key() {
        let registrar =
            HeliusWebhookRegistrar::new(HELIUS_API_BASE.parse().unwrap(), "k123").unwrap();
        let url = registrar.endpoint("/v0/webhooks/w2").unwrap();
        assert_eq!(url.as_str(), "https://api.helius.xyz/v0/webhooks/w2?api-key=k123");
    }
}
