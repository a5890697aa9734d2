//! COD 核验中枢
//!
//! 订单从进入到出结果的完整生命周期：判定是否需要核验、按月度配额
//! 预占额度、恰好一次地下发核验消息、将回执与按钮回复对账为核验状态，
//! 并在终态时回写商家平台。平台 API 与消息通道的网络细节由各 spoke
//! crate 承担（HTTP 路由与签名校验在上游网关完成），
//! 本 crate 只依赖仓储与出站 trait。

pub mod billing;
pub mod eligibility;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod outbound;
pub mod quota;
pub mod reconciler;
pub mod repository;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{HubError, Result};
