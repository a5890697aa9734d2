//! 核验域枚举类型定义

use serde::{Deserialize, Serialize};

/// 核验记录状态
///
/// 状态机只允许前进：pending -> sent -> delivered -> read，
/// 其后进入 confirmed / canceled 二选一的终态；
/// failed / expired 为吸收态，只能由编排器的失败路径或外部过期流程进入。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "verification_status", rename_all = "lowercase")]
pub enum VerificationStatus {
    /// 已创建，消息尚未下发
    #[default]
    Pending,
    /// 消息已被 Provider 接收
    Sent,
    /// 投递回执：已送达客户设备
    Delivered,
    /// 投递回执：客户已读
    Read,
    /// 客户点击确认（终态）
    Confirmed,
    /// 客户点击取消（终态）
    Canceled,
    /// 超时未响应（终态，由外部过期流程写入）
    Expired,
    /// 下发失败或配额耗尽（终态）
    Failed,
}

impl VerificationStatus {
    /// 是否为终态（不再接受任何状态迁移）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Canceled | Self::Expired | Self::Failed
        )
    }

    /// 投递进度序号，用于保证回执只能推进不能回退
    ///
    /// 终态不在投递进度之内，返回 None。
    pub fn delivery_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            _ => None,
        }
    }

    /// 当前状态能否被投递回执推进到 `target`
    ///
    /// 回执可能乱序或重复到达：允许跳级前进（pending 直接到 read），
    /// 拒绝原地重放与回退，终态一律拒绝。
    pub fn can_advance_to(&self, target: VerificationStatus) -> bool {
        match (self.delivery_rank(), target.delivery_rank()) {
            (Some(current), Some(next)) => current < next,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 支持的商家平台
///
/// 封闭枚举而非字符串查表：新平台必须显式加入此处并绑定资格策略，
/// 拼写错误的配置会落到 unsupported_platform 而非静默跳过。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Shopify,
    Salla,
    Zid,
    WooCommerce,
}

impl PlatformType {
    /// 大小写不敏感地解析平台标识，未知平台返回 None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "shopify" => Some(Self::Shopify),
            "salla" => Some(Self::Salla),
            "zid" => Some(Self::Zid),
            "woocommerce" => Some(Self::WooCommerce),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shopify => "shopify",
            Self::Salla => "salla",
            Self::Zid => "zid",
            Self::WooCommerce => "woocommerce",
        }
    }
}

/// 消息通道投递回执状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// 解析 Provider 回执中的状态字符串，未知状态返回 None（忽略）
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    /// 对应的核验状态
    pub fn as_verification_status(&self) -> VerificationStatus {
        match self {
            Self::Sent => VerificationStatus::Sent,
            Self::Delivered => VerificationStatus::Delivered,
            Self::Read => VerificationStatus::Read,
        }
    }
}

/// 客户按钮回复动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    Confirm,
    Cancel,
}

impl ReplyAction {
    /// 解析回复动作，兼容 yes/no 别名
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "confirm" | "yes" => Some(Self::Confirm),
            "cancel" | "no" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// 动作对应的目标终态
    pub fn target_status(&self) -> VerificationStatus {
        match self {
            Self::Confirm => VerificationStatus::Confirmed,
            Self::Cancel => VerificationStatus::Canceled,
        }
    }
}
