//! 订单仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::OrderRepository;
use crate::error::Result;
use crate::models::{NormalizedOrder, Order};

const ORDER_COLUMNS: &str = r#"
    id, org_id, integration_id, external_order_id, order_number,
    customer_phone, customer_name, customer_email,
    total_price, currency, payment_method, raw_payload, created_at
"#;

/// PostgreSQL 订单仓储
///
/// (integration_id, external_order_id) 上有唯一约束，
/// 同一平台订单的重复投递在此处被拦下。
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_by_external_id(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
    ) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE integration_id = $1 AND external_order_id = $2
            "#
        ))
        .bind(integration_id)
        .bind(external_order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn create(&self, order: &NormalizedOrder) -> Result<Order> {
        let created = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders
                (org_id, integration_id, external_order_id, order_number,
                 customer_phone, customer_name, customer_email,
                 total_price, currency, payment_method, raw_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.org_id)
        .bind(order.integration_id)
        .bind(&order.external_order_id)
        .bind(&order.order_number)
        .bind(&order.customer_phone)
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(&order.total_price)
        .bind(&order.currency)
        .bind(&order.payment_method)
        .bind(&order.raw_payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}
