//! webhook 事件去重仓储
//!
//! Shopify 对未及时 ACK 的 webhook 会重试投递，业务层的幂等
//! 约束之外再加一层传输级去重：按 X-Shopify-Webhook-Id 记账，
//! 重复投递在入口处直接确认掉，不进入核验流水线。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// webhook 事件存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// 记录一条 webhook 事件；首次见到返回 true，重复投递返回 false
    async fn record_if_new(
        &self,
        webhook_id: &str,
        topic: &str,
        shop_domain: &str,
        org_id: Uuid,
        integration_id: Uuid,
    ) -> Result<bool>;
}

/// PostgreSQL webhook 事件存储
///
/// webhook_id 上有唯一约束，并发重复投递由 ON CONFLICT 裁决。
pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn record_if_new(
        &self,
        webhook_id: &str,
        topic: &str,
        shop_domain: &str,
        org_id: Uuid,
        integration_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO shopify_webhook_events
                (webhook_id, topic, shop_domain, org_id, integration_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (webhook_id) DO NOTHING
            "#,
        )
        .bind(webhook_id)
        .bind(topic)
        .bind(shop_domain)
        .bind(org_id)
        .bind(integration_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
