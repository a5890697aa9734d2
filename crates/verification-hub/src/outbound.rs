//! 出站边界契约
//!
//! 中枢不直接依赖任何消息通道或电商平台的 SDK，
//! 下发确认消息与订单打标签都经由 trait 抽象，
//! 具体实现由各 spoke crate 提供，测试用 mock 替换。

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// 待下发的确认消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMessage {
    /// E.164 格式的客户手机号
    pub to_phone: String,
    pub order_number: String,
    pub amount: String,
    pub currency: String,
    /// 快捷回复按钮的载荷需要携带核验 ID 以便回程定位
    pub verification_id: Uuid,
}

/// 下发回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// 通道侧消息标识（WhatsApp 的 wamid）。
    /// 通道接受了请求但没有返回标识时为 None，调用方按业务失败处理。
    pub provider_message_id: Option<String>,
}

/// 消息下发通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: &VerificationMessage) -> Result<DispatchReceipt>;
}

/// 平台订单打标签
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderTagger: Send + Sync {
    /// 在平台订单上追加标签，标签在平台侧幂等（重复追加无副作用）
    async fn add_order_tag(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
        tag: &str,
    ) -> Result<()>;
}
