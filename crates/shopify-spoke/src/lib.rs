//! Shopify 接入适配层
//!
//! 把 Shopify 的订单 webhook 映射为标准化订单交给核验中枢，
//! 并以 Admin GraphQL API 实现终态标签回写。
//! webhook 的 HMAC 签名校验与 HTTP 路由在上游网关完成，
//! 本 crate 接收的是已验证的 payload。

pub mod api_client;
pub mod error;
pub mod events_repo;
pub mod webhook;

pub use error::{Result, ShopifyError};
