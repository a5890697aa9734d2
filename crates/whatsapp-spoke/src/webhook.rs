//! WhatsApp 入站 webhook 处理
//!
//! Meta 把按钮回复与投递回执混在同一个 webhook 里推送，
//! 结构为 entry[].changes[].value.{messages,statuses}。
//! 这里先把 payload 摊平成本域事件，再逐个交给状态对账器；
//! 无法识别的事件静默忽略，webhook 始终被确认。

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use verification_hub::models::DeliveryStatus;
use verification_hub::reconciler::{ReconcileOutcome, StatusReconciler};

use crate::error::Result;

// ==================== webhook payload 模型 ====================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub field: Option<String>,
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
}

/// 客户发来的消息；核验流程只关心按钮回复
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub id: Option<String>,
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    /// 模板快捷回复按钮（type == "button"）
    pub button: Option<ButtonReply>,
    /// 交互式消息回复（type == "interactive"）
    pub interactive: Option<InteractiveReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonReply {
    pub payload: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractiveReply {
    pub button_reply: Option<InteractiveButtonReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractiveButtonReply {
    pub id: Option<String>,
    pub title: Option<String>,
}

/// 投递回执
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// 对应下发时返回的消息标识
    pub id: Option<String>,
    pub status: Option<String>,
    pub recipient_id: Option<String>,
}

impl InboundMessage {
    /// 取按钮回复载荷：交互式回复优先，退回模板按钮载荷
    fn reply_payload(&self) -> Option<&str> {
        self.interactive
            .as_ref()
            .and_then(|i| i.button_reply.as_ref())
            .and_then(|b| b.id.as_deref())
            .or_else(|| self.button.as_ref().and_then(|b| b.payload.as_deref()))
    }
}

// ==================== 事件摊平 ====================

/// 摊平后的本域事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// 按钮回复，载荷形如 `confirm_<verification_id>`
    Reply { payload: String },
    /// 投递回执
    Delivery {
        provider_message_id: String,
        status: DeliveryStatus,
    },
}

/// 把 webhook payload 摊平成事件列表
///
/// 文本消息、未知状态（如 failed）与缺字段的条目全部丢弃。
pub fn extract_events(payload: &WebhookPayload) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    for entry in &payload.entry {
        for change in &entry.changes {
            let Some(value) = &change.value else {
                continue;
            };

            // 客户手动回复的文本等非按钮消息不在核验流程内
            for message in &value.messages {
                if let Some(reply) = message.reply_payload() {
                    events.push(InboundEvent::Reply {
                        payload: reply.to_string(),
                    });
                }
            }

            for status_update in &value.statuses {
                let Some(id) = &status_update.id else {
                    continue;
                };
                let Some(status) = status_update
                    .status
                    .as_deref()
                    .and_then(DeliveryStatus::parse)
                else {
                    continue;
                };
                events.push(InboundEvent::Delivery {
                    provider_message_id: id.clone(),
                    status,
                });
            }
        }
    }

    events
}

// ==================== webhook 服务 ====================

/// WhatsApp 入站 webhook 服务
pub struct WhatsAppWebhookService {
    reconciler: Arc<StatusReconciler>,
}

impl WhatsAppWebhookService {
    pub fn new(reconciler: Arc<StatusReconciler>) -> Self {
        Self { reconciler }
    }

    /// 处理一次 webhook 推送，返回每个事件的对账结果
    ///
    /// payload 无法解析时记警告并返回空结果，Meta 侧不需要重试。
    pub async fn handle_incoming(
        &self,
        payload: serde_json::Value,
    ) -> Result<Vec<ReconcileOutcome>> {
        let parsed: WebhookPayload = match serde_json::from_value(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "webhook payload 无法解析，忽略");
                return Ok(Vec::new());
            }
        };

        let events = extract_events(&parsed);
        let mut outcomes = Vec::with_capacity(events.len());

        for event in events {
            let outcome = match event {
                InboundEvent::Reply { payload } => {
                    self.reconciler.process_reply_event(&payload).await?
                }
                InboundEvent::Delivery {
                    provider_message_id,
                    status,
                } => {
                    self.reconciler
                        .process_delivery_status_event(&provider_message_id, status)
                        .await?
                }
            };
            outcomes.push(outcome);
        }

        info!(count = outcomes.len(), "webhook 事件已对账");
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "0", "changes": [{"field": "messages", "value": value}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_template_button_reply() {
        let payload = wrap(json!({
            "messages": [{
                "id": "wamid.reply",
                "from": "966501234567",
                "type": "button",
                "button": {
                    "payload": "confirm_6e5c9a2e-0000-0000-0000-000000000000",
                    "text": "تأكيد"
                }
            }]
        }));

        assert_eq!(
            extract_events(&payload),
            vec![InboundEvent::Reply {
                payload: "confirm_6e5c9a2e-0000-0000-0000-000000000000".to_string()
            }]
        );
    }

    #[test]
    fn test_interactive_reply_takes_precedence() {
        let payload = wrap(json!({
            "messages": [{
                "id": "wamid.reply",
                "type": "interactive",
                "interactive": {
                    "button_reply": {"id": "cancel_abc", "title": "إلغاء"}
                },
                "button": {"payload": "confirm_abc"}
            }]
        }));

        assert_eq!(
            extract_events(&payload),
            vec![InboundEvent::Reply {
                payload: "cancel_abc".to_string()
            }]
        );
    }

    #[test]
    fn test_extract_delivery_statuses() {
        let payload = wrap(json!({
            "statuses": [
                {"id": "wamid.1", "status": "sent", "recipient_id": "966501234567"},
                {"id": "wamid.1", "status": "delivered", "recipient_id": "966501234567"},
                {"id": "wamid.1", "status": "read", "recipient_id": "966501234567"},
                // Provider 侧的 failed 状态不在本域状态机内
                {"id": "wamid.1", "status": "failed", "recipient_id": "966501234567"}
            ]
        }));

        let events = extract_events(&payload);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            InboundEvent::Delivery {
                provider_message_id: "wamid.1".to_string(),
                status: DeliveryStatus::Delivered,
            }
        );
    }

    #[test]
    fn test_text_messages_are_ignored() {
        let payload = wrap(json!({
            "messages": [{
                "id": "wamid.text",
                "from": "966501234567",
                "type": "text",
                "text": {"body": "مرحبا"}
            }]
        }));

        assert!(extract_events(&payload).is_empty());
    }

    #[test]
    fn test_empty_and_malformed_values() {
        let payload = wrap(json!({}));
        assert!(extract_events(&payload).is_empty());

        // statuses 缺 id 或缺 status 的条目被丢弃
        let payload = wrap(json!({
            "statuses": [
                {"status": "read"},
                {"id": "wamid.2"}
            ]
        }));
        assert!(extract_events(&payload).is_empty());
    }

    #[test]
    fn test_payload_with_multiple_entries() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [
                {"changes": [{"field": "messages", "value": {
                    "statuses": [{"id": "wamid.a", "status": "delivered"}]
                }}]},
                {"changes": [{"field": "messages", "value": {
                    "statuses": [{"id": "wamid.b", "status": "read"}]
                }}]}
            ]
        }))
        .unwrap();

        assert_eq!(extract_events(&payload).len(), 2);
    }
}
