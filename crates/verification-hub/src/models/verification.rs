//! 核验记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::VerificationStatus;

/// 核验记录
///
/// 追踪一条出站确认消息及其最终结果。每个订单至多一条
/// （unique_active_verification_per_order 约束），
/// 下发前/失败路径由编排器写入，下发后由对账器写入。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Verification {
    pub id: Uuid,
    pub org_id: Uuid,
    pub order_id: Uuid,
    pub status: VerificationStatus,
    /// 消息通道返回的消息标识（WhatsApp 的 wamid），投递回执据此定位记录
    #[sqlx(rename = "wa_message_id")]
    pub provider_message_id: Option<String>,
    pub template_name: Option<String>,
    pub language_code: Option<String>,
    pub attempts: i32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建核验记录的入参
#[derive(Debug, Clone)]
pub struct NewVerification {
    pub org_id: Uuid,
    pub order_id: Uuid,
    pub status: VerificationStatus,
    pub metadata: serde_json::Value,
}

impl NewVerification {
    /// 常规路径：待下发的 pending 记录
    pub fn pending(org_id: Uuid, order_id: Uuid) -> Self {
        Self {
            org_id,
            order_id,
            status: VerificationStatus::Pending,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// 配额拒绝路径：直接落 failed，metadata 记录拒绝详情
    pub fn failed(org_id: Uuid, order_id: Uuid, metadata: serde_json::Value) -> Self {
        Self {
            org_id,
            order_id,
            status: VerificationStatus::Failed,
            metadata,
        }
    }
}
