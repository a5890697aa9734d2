//! WhatsApp 消息通道适配层
//!
//! 出站：以 Cloud API 模板消息实现核验消息下发（`MessageDispatcher`）。
//! 入站：解析 Meta webhook，把按钮回复与投递回执路由给状态对账器。
//! webhook 的签名校验（X-Hub-Signature-256）在上游网关完成。

pub mod client;
pub mod error;
pub mod webhook;

pub use error::{Result, WhatsAppError};
