//! 核验记录仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::VerificationRepository;
use crate::error::{HubError, Result};
use crate::models::{NewVerification, Verification, VerificationStatus};

const VERIFICATION_COLUMNS: &str = r#"
    id, org_id, order_id, status, wa_message_id, template_name, language_code,
    attempts, last_sent_at, confirmed_at, canceled_at, expired_at,
    metadata, created_at, updated_at
"#;

/// PostgreSQL 核验记录仓储
///
/// order_id 上有唯一约束（unique_active_verification_per_order），
/// 同一订单的并发建档只有一方能成功。
pub struct PgVerificationRepository {
    pool: PgPool,
}

impl PgVerificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationRepository for PgVerificationRepository {
    async fn create(&self, new: NewVerification) -> Result<Verification> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            INSERT INTO verifications (org_id, order_id, status, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING {VERIFICATION_COLUMNS}
            "#
        ))
        .bind(new.org_id)
        .bind(new.order_id)
        .bind(new.status)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(verification)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Verification>> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            SELECT {VERIFICATION_COLUMNS}
            FROM verifications
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(verification)
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<Verification>> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            SELECT {VERIFICATION_COLUMNS}
            FROM verifications
            WHERE order_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(verification)
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Verification>> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            SELECT {VERIFICATION_COLUMNS}
            FROM verifications
            WHERE wa_message_id = $1
            "#
        ))
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(verification)
    }

    async fn update_status(&self, id: Uuid, status: VerificationStatus) -> Result<Verification> {
        // 终态时间戳随状态一并回填
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            UPDATE verifications
            SET status = $2,
                confirmed_at = CASE WHEN $2 = 'confirmed' THEN NOW() ELSE confirmed_at END,
                canceled_at  = CASE WHEN $2 = 'canceled'  THEN NOW() ELSE canceled_at END,
                expired_at   = CASE WHEN $2 = 'expired'   THEN NOW() ELSE expired_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {VERIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        verification.ok_or(HubError::VerificationNotFound(id))
    }

    async fn mark_sent(&self, id: Uuid, provider_message_id: &str) -> Result<Verification> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            UPDATE verifications
            SET status = 'sent',
                wa_message_id = $2,
                attempts = attempts + 1,
                last_sent_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {VERIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        verification.ok_or(HubError::VerificationNotFound(id))
    }

    async fn mark_failed(&self, id: Uuid, metadata: serde_json::Value) -> Result<Verification> {
        let verification = sqlx::query_as::<_, Verification>(&format!(
            r#"
            UPDATE verifications
            SET status = 'failed',
                metadata = metadata || $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {VERIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?;

        verification.ok_or(HubError::VerificationNotFound(id))
    }
}
