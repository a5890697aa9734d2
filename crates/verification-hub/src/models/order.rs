//! 订单模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 平台 webhook 适配层解析后的标准化订单
///
/// 各 spoke 负责把平台私有的 payload 映射为此结构；
/// 中枢只认标准化字段，raw_payload 保留原始数据供资格判定取证。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub org_id: Uuid,
    pub integration_id: Uuid,
    /// 平台侧订单 ID，与 integration_id 组成唯一键
    pub external_order_id: String,
    pub order_number: String,
    /// E.164 格式客户电话
    pub customer_phone: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    /// 按平台回传原样保留的金额字符串，仅透传到核验消息
    pub total_price: String,
    pub currency: String,
    pub payment_method: String,
    pub raw_payload: serde_json::Value,
}

/// 订单持久化记录
///
/// 每个 (integration_id, external_order_id) 只创建一次，
/// 此后不可变（外部脱敏流程除外）。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub org_id: Uuid,
    pub integration_id: Option<Uuid>,
    pub external_order_id: String,
    pub order_number: Option<String>,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub total_price: Option<String>,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
