//! Shopify 适配层错误类型

use akeed_shared::error::AkeedError;

/// Shopify 适配层错误
#[derive(Debug, thiserror::Error)]
pub enum ShopifyError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// webhook payload 无法解析为订单
    #[error("webhook payload 解析失败: {0}")]
    InvalidPayload(String),

    #[error("Shopify API 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Hub(#[from] verification_hub::HubError),

    #[error(transparent)]
    Shared(#[from] AkeedError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ShopifyError>;
