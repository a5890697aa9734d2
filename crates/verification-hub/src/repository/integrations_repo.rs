//! 集成仓储
//!
//! 集成记录由安装/计费流程写入，核验链路只读。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::IntegrationRepository;
use crate::error::Result;
use crate::models::Integration;

const INTEGRATION_COLUMNS: &str = r#"
    id, org_id, platform_type, platform_store_url, store_name, access_token,
    is_active, is_auto_verify_enabled, billing_plan_id, billing_status
"#;

/// PostgreSQL 集成仓储
pub struct PgIntegrationRepository {
    pool: PgPool,
}

impl PgIntegrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationRepository for PgIntegrationRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Integration>> {
        let integration = sqlx::query_as::<_, Integration>(&format!(
            r#"
            SELECT {INTEGRATION_COLUMNS}
            FROM integrations
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(integration)
    }

    async fn find_by_platform_domain(
        &self,
        domain: &str,
        platform_type: &str,
    ) -> Result<Option<Integration>> {
        let integration = sqlx::query_as::<_, Integration>(&format!(
            r#"
            SELECT {INTEGRATION_COLUMNS}
            FROM integrations
            WHERE platform_store_url = $1 AND platform_type = $2
            "#
        ))
        .bind(domain)
        .bind(platform_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(integration)
    }
}
