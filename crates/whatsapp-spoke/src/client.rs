//! WhatsApp Cloud API 客户端
//!
//! 以预审核的模板消息下发 COD 确认：正文参数为订单号与金额，
//! 两个快捷回复按钮的载荷携带核验 ID，客户点击后原样回传。

use async_trait::async_trait;

use serde_json::{Value, json};
use tracing::{debug, warn};

use akeed_shared::config::WhatsAppConfig;
use verification_hub::HubError;
use verification_hub::outbound::{DispatchReceipt, MessageDispatcher, VerificationMessage};

const GRAPH_API_BASE: &str = "https://graph.facebook.com";

/// WhatsApp Cloud API 客户端
pub struct WhatsAppClient {
    http: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn messages_endpoint(&self) -> String {
        format!(
            "{GRAPH_API_BASE}/{}/{}/messages",
            self.config.api_version, self.config.phone_number_id
        )
    }

    /// 提交请求体并返回 Cloud API 响应
    async fn send_template(&self, body: &Value) -> crate::Result<Value> {
        let response = self
            .http
            .post(self.messages_endpoint())
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() {
            let detail = payload
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("未知错误");
            return Err(crate::WhatsAppError::Api(format!("HTTP {status}: {detail}")));
        }

        Ok(payload)
    }
}

/// 组装模板消息请求体
fn build_template_payload(message: &VerificationMessage, config: &WhatsAppConfig) -> Value {
    let confirm_payload = format!("confirm_{}", message.verification_id);
    let cancel_payload = format!("cancel_{}", message.verification_id);
    let amount = format!("{} {}", message.amount, message.currency);

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": message.to_phone,
        "type": "template",
        "template": {
            "name": config.template_name,
            "language": {"code": config.language_code},
            "components": [
                {
                    "type": "body",
                    "parameters": [
                        {"type": "text", "text": message.order_number},
                        {"type": "text", "text": amount},
                    ]
                },
                {
                    "type": "button",
                    "sub_type": "quick_reply",
                    "index": "0",
                    "parameters": [{"type": "payload", "payload": confirm_payload}]
                },
                {
                    "type": "button",
                    "sub_type": "quick_reply",
                    "index": "1",
                    "parameters": [{"type": "payload", "payload": cancel_payload}]
                }
            ]
        }
    })
}

/// 从发送响应中取通道消息标识
fn parse_send_response(response: &Value) -> Option<String> {
    response
        .pointer("/messages/0/id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[async_trait]
impl MessageDispatcher for WhatsAppClient {
    async fn dispatch(
        &self,
        message: &VerificationMessage,
    ) -> verification_hub::Result<DispatchReceipt> {
        let body = build_template_payload(message, &self.config);

        let payload = self
            .send_template(&body)
            .await
            .map_err(|e| HubError::Dispatch(e.to_string()))?;

        let provider_message_id = parse_send_response(&payload);
        match &provider_message_id {
            Some(id) => debug!(
                verification_id = %message.verification_id,
                provider_message_id = %id,
                "模板消息已提交"
            ),
            // 缺失消息标识由编排器按业务失败补偿
            None => warn!(
                verification_id = %message.verification_id,
                "Cloud API 响应中没有消息标识"
            ),
        }

        Ok(DispatchReceipt {
            provider_message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn make_message() -> VerificationMessage {
        VerificationMessage {
            to_phone: "+966501234567".to_string(),
            order_number: "#1001".to_string(),
            amount: "199.00".to_string(),
            currency: "SAR".to_string(),
            verification_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_template_payload_structure() {
        let config = WhatsAppConfig::default();
        let body = build_template_payload(&make_message(), &config);

        assert_eq!(body["to"], "+966501234567");
        assert_eq!(body["template"]["name"], "akeed_cod_verification");
        assert_eq!(body["template"]["language"]["code"], "ar");

        let components = body["template"]["components"].as_array().unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(components[0]["parameters"][0]["text"], "#1001");
        assert_eq!(components[0]["parameters"][1]["text"], "199.00 SAR");
    }

    #[test]
    fn test_quick_reply_payloads_carry_verification_id() {
        let config = WhatsAppConfig::default();
        let body = build_template_payload(&make_message(), &config);

        let id = Uuid::nil();
        assert_eq!(
            body["template"]["components"][1]["parameters"][0]["payload"],
            format!("confirm_{id}")
        );
        assert_eq!(
            body["template"]["components"][2]["parameters"][0]["payload"],
            format!("cancel_{id}")
        );
    }

    #[test]
    fn test_parse_send_response() {
        let response = serde_json::json!({
            "messaging_product": "whatsapp",
            "contacts": [{"input": "+966501234567", "wa_id": "966501234567"}],
            "messages": [{"id": "wamid.HBgLOTY2NTAxMjM0NTY3"}]
        });
        assert_eq!(
            parse_send_response(&response).as_deref(),
            Some("wamid.HBgLOTY2NTAxMjM0NTY3")
        );

        // 响应缺 messages 时返回 None 而不是报错
        let empty = serde_json::json!({"messaging_product": "whatsapp"});
        assert_eq!(parse_send_response(&empty), None);
    }
}
