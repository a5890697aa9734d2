//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于编排器与对账器依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Integration, NewVerification, NormalizedOrder, Order, Verification, VerificationStatus,
};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 按集成 + 平台订单号查找（幂等键）
    async fn find_by_external_id(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
    ) -> Result<Option<Order>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    /// 插入标准化订单；撞唯一约束时透传数据库错误由调用方甄别
    async fn create(&self, order: &NormalizedOrder) -> Result<Order>;
}

/// 核验记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationRepository: Send + Sync {
    async fn create(&self, new: NewVerification) -> Result<Verification>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Verification>>;

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<Verification>>;

    /// 按通道消息标识定位记录（投递回执路径）
    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Verification>>;

    /// 更新状态并按终态回填对应时间戳
    async fn update_status(&self, id: Uuid, status: VerificationStatus) -> Result<Verification>;

    /// 下发成功：记录通道消息标识、置 sent、attempts + 1
    async fn mark_sent(&self, id: Uuid, provider_message_id: &str) -> Result<Verification>;

    /// 下发失败：置 failed 并把失败详情并入 metadata
    async fn mark_failed(&self, id: Uuid, metadata: serde_json::Value) -> Result<Verification>;
}

/// 集成仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Integration>>;

    /// 按店铺域名 + 平台类型查找（webhook 入口路径）
    async fn find_by_platform_domain(
        &self,
        domain: &str,
        platform_type: &str,
    ) -> Result<Option<Integration>>;
}
