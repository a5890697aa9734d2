//! 商家集成模型
//!
//! 集成由外部的安装/计费流程维护，中枢只读：
//! 取平台类型做资格判定路由、取计费计划做配额上限、
//! 取激活与计费状态做处理闸门。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::PlatformType;

/// 进入阻断名单的计费状态（大小写不敏感）
const BLOCKED_BILLING_STATUSES: &[&str] =
    &["cancelled", "canceled", "declined", "expired", "frozen"];

/// 商家集成（连接的店铺账号 + 计费状态）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Integration {
    pub id: Uuid,
    pub org_id: Uuid,
    pub platform_type: String,
    pub platform_store_url: String,
    pub store_name: Option<String>,
    /// 平台 Admin API 访问令牌，终态回写打标签时使用
    pub access_token: Option<String>,
    pub is_active: bool,
    pub is_auto_verify_enabled: bool,
    pub billing_plan_id: Option<String>,
    pub billing_status: Option<String>,
}

impl Integration {
    /// 解析平台类型，未知平台返回 None
    pub fn platform(&self) -> Option<PlatformType> {
        PlatformType::parse(&self.platform_type)
    }

    /// 计费状态是否阻断订单处理
    ///
    /// 未激活一律阻断；billing_status 为空视为未进入计费流程，不阻断。
    pub fn is_billing_blocked(&self) -> bool {
        if !self.is_active {
            return true;
        }

        match &self.billing_status {
            Some(status) => {
                let normalized = status.trim().to_lowercase();
                BLOCKED_BILLING_STATUSES.contains(&normalized.as_str())
            }
            None => false,
        }
    }
}
