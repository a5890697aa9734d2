//! 核验中枢专用错误类型
//!
//! 在共享库 AkeedError 基础上定义本域特有的错误变体。
//! 注意：不合格订单、配额耗尽等属于业务结果而非错误，
//! 由 `OrderIntake` / 核验记录的 failed 状态表达，不会出现在这里。

use akeed_shared::error::AkeedError;
use uuid::Uuid;

/// 核验流程错误
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 消息通道下发失败（网络、鉴权或 Provider 端错误）
    #[error("核验消息下发失败: {0}")]
    Dispatch(String),

    /// 商家平台打标签调用失败；仅在终态回写时出现，调用方记录后吞掉
    #[error("订单标签回写失败: {0}")]
    Tagging(String),

    #[error("核验记录未找到: {0}")]
    VerificationNotFound(Uuid),

    #[error("订单未找到: {0}")]
    OrderNotFound(Uuid),

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] AkeedError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// 是否为唯一约束冲突
    ///
    /// 订单与核验记录的并发创建依赖唯一约束裁决，
    /// 失败的一方据此走"已存在"分支而非向上抛错。
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("23505")
            }
            Self::Shared(e) => e.is_unique_violation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::Dispatch("连接超时".to_string());
        assert_eq!(err.to_string(), "核验消息下发失败: 连接超时");

        let id = Uuid::nil();
        let err = HubError::VerificationNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_shared_passthrough() {
        let shared = AkeedError::Internal("x".to_string());
        let err = HubError::Shared(shared);
        assert_eq!(err.to_string(), "内部错误: x");
    }

    #[test]
    fn test_non_database_is_not_unique_violation() {
        assert!(!HubError::Dispatch("x".to_string()).is_unique_violation());
    }
}
