//! WhatsApp 适配层错误类型

/// WhatsApp 适配层错误
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("Cloud API 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud API 返回非 2xx 或错误体
    #[error("Cloud API 调用失败: {0}")]
    Api(String),

    #[error(transparent)]
    Hub(#[from] verification_hub::HubError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, WhatsAppError>;
