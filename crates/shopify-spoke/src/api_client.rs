//! Shopify Admin GraphQL API 客户端
//!
//! 终态回写用的 tagsAdd 调用。每个店铺用自己的 access_token，
//! 客户端本身无状态，按 integration_id 现查凭据。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use akeed_shared::config::ShopifyConfig;
use verification_hub::HubError;
use verification_hub::outbound::OrderTagger;
use verification_hub::repository::IntegrationRepository;

use crate::error::Result;

const TAGS_ADD_MUTATION: &str = r#"
mutation tagsAdd($id: ID!, $tags: [String!]!) {
  tagsAdd(id: $id, tags: $tags) {
    node { id }
    userErrors { field message }
  }
}
"#;

/// Shopify Admin API 客户端
pub struct ShopifyApiClient {
    http: reqwest::Client,
    api_version: String,
    integrations: Arc<dyn IntegrationRepository>,
}

impl ShopifyApiClient {
    pub fn new(
        config: &ShopifyConfig,
        integrations: Arc<dyn IntegrationRepository>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_version: config.api_version.clone(),
            integrations,
        })
    }

    fn graphql_endpoint(&self, store_url: &str) -> String {
        format!(
            "https://{}/admin/api/{}/graphql.json",
            store_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// 平台订单 ID 转 Admin API 的全局 ID
fn order_gid(external_order_id: &str) -> String {
    format!("gid://shopify/Order/{external_order_id}")
}

fn build_tags_add_request(external_order_id: &str, tag: &str) -> Value {
    json!({
        "query": TAGS_ADD_MUTATION,
        "variables": {
            "id": order_gid(external_order_id),
            "tags": [tag],
        }
    })
}

/// 提取响应中的错误信息（GraphQL errors 与 tagsAdd userErrors）
fn extract_errors(response: &Value) -> Vec<String> {
    let mut messages = Vec::new();

    if let Some(errors) = response.get("errors").and_then(|v| v.as_array()) {
        for error in errors {
            if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
                messages.push(message.to_string());
            }
        }
    }

    if let Some(user_errors) = response
        .pointer("/data/tagsAdd/userErrors")
        .and_then(|v| v.as_array())
    {
        for error in user_errors {
            if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
                messages.push(message.to_string());
            }
        }
    }

    messages
}

#[async_trait]
impl OrderTagger for ShopifyApiClient {
    async fn add_order_tag(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
        tag: &str,
    ) -> verification_hub::Result<()> {
        let integration = self
            .integrations
            .find_by_id(integration_id)
            .await?
            .ok_or_else(|| HubError::Tagging(format!("集成不存在: {integration_id}")))?;

        let access_token = integration
            .access_token
            .as_deref()
            .ok_or_else(|| HubError::Tagging(format!("集成缺少访问令牌: {integration_id}")))?;

        let body = build_tags_add_request(external_order_id, tag);
        let endpoint = self.graphql_endpoint(&integration.platform_store_url);

        let response: Value = self
            .http
            .post(&endpoint)
            .header("X-Shopify-Access-Token", access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| HubError::Tagging(e.to_string()))?
            .error_for_status()
            .map_err(|e| HubError::Tagging(e.to_string()))?
            .json()
            .await
            .map_err(|e| HubError::Tagging(e.to_string()))?;

        let errors = extract_errors(&response);
        if !errors.is_empty() {
            return Err(HubError::Tagging(errors.join("; ")));
        }

        debug!(
            external_order_id,
            tag,
            store = %integration.platform_store_url,
            "订单标签已回写"
        );

        Ok(())
    }
}
