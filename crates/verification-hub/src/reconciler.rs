//! 状态对账器
//!
//! 消息通道的回程事件分两类：投递回执（sent/delivered/read）与
//! 客户按钮回复（confirm/cancel）。回执按只进不退的进度序推进状态，
//! 回复把非终态记录一次性收敛到 confirmed/canceled 并触发终态回写。
//!
//! 事件可能乱序、重复、指向未知记录，对账器对这些情况一律
//! 返回 `Ignored` 而非报错，让通道侧的重试机制不至于空转。

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DeliveryStatus, ReplyAction, VerificationStatus};
use crate::orchestrator::VerificationOrchestrator;
use crate::repository::VerificationRepository;

/// 对账结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 状态已推进
    Applied {
        verification_id: Uuid,
        status: VerificationStatus,
    },
    /// 事件被忽略（重复、乱序、无法定位记录等）
    Ignored { reason: &'static str },
}

impl ReconcileOutcome {
    fn ignored(reason: &'static str) -> Self {
        Self::Ignored { reason }
    }
}

/// 状态对账器
pub struct StatusReconciler {
    verifications: Arc<dyn VerificationRepository>,
    orchestrator: Arc<VerificationOrchestrator>,
}

impl StatusReconciler {
    pub fn new(
        verifications: Arc<dyn VerificationRepository>,
        orchestrator: Arc<VerificationOrchestrator>,
    ) -> Self {
        Self {
            verifications,
            orchestrator,
        }
    }

    /// 处理客户按钮回复
    ///
    /// 载荷格式为 `<action>_<verification_id>`（下发时写入快捷回复按钮）。
    /// 先读记录再决定是否迁移：重复点击与迟到回复都不会覆盖已有终态。
    pub async fn process_reply_event(&self, payload: &str) -> Result<ReconcileOutcome> {
        let Some((action_raw, id_raw)) = payload.split_once('_') else {
            warn!(payload, "按钮回复载荷格式无法解析，忽略");
            return Ok(ReconcileOutcome::ignored("malformed_payload"));
        };

        let Some(action) = ReplyAction::parse(action_raw) else {
            warn!(payload, "按钮回复动作未知，忽略");
            return Ok(ReconcileOutcome::ignored("unknown_action"));
        };

        let Ok(verification_id) = Uuid::parse_str(id_raw) else {
            warn!(payload, "按钮回复载荷中的核验 ID 非法，忽略");
            return Ok(ReconcileOutcome::ignored("malformed_payload"));
        };

        let Some(verification) = self.verifications.find_by_id(verification_id).await? else {
            warn!(verification_id = %verification_id, "按钮回复指向不存在的核验记录，忽略");
            return Ok(ReconcileOutcome::ignored("unknown_verification"));
        };

        let target = action.target_status();

        if verification.status == target {
            // 客户重复点击同一个按钮
            return Ok(ReconcileOutcome::ignored("already_applied"));
        }

        if verification.status.is_terminal() {
            // 已有其它终态（另一按钮、过期或失败），迟到的回复不翻转结果
            info!(
                verification_id = %verification_id,
                current = %verification.status,
                target = %target,
                "核验已有终态，迟到的按钮回复被忽略"
            );
            return Ok(ReconcileOutcome::ignored("already_resolved"));
        }

        let updated = self
            .verifications
            .update_status(verification_id, target)
            .await?;

        info!(
            verification_id = %verification_id,
            status = %updated.status,
            "客户回复已落账"
        );

        self.orchestrator
            .finalize_verification(verification_id, target)
            .await?;

        Ok(ReconcileOutcome::Applied {
            verification_id,
            status: target,
        })
    }

    /// 处理投递回执
    ///
    /// sent 回执不携带新信息（下发成功时已置 sent），直接忽略；
    /// delivered/read 按进度序推进，乱序与重放被 `can_advance_to` 拒绝。
    pub async fn process_delivery_status_event(
        &self,
        provider_message_id: &str,
        delivery_status: DeliveryStatus,
    ) -> Result<ReconcileOutcome> {
        if delivery_status == DeliveryStatus::Sent {
            return Ok(ReconcileOutcome::ignored("sent_receipt_noop"));
        }

        let Some(verification) = self
            .verifications
            .find_by_provider_message_id(provider_message_id)
            .await?
        else {
            warn!(provider_message_id, "投递回执无法定位核验记录，忽略");
            return Ok(ReconcileOutcome::ignored("unknown_message"));
        };

        let target = delivery_status.as_verification_status();

        if !verification.status.can_advance_to(target) {
            return Ok(ReconcileOutcome::ignored("stale_receipt"));
        }

        let updated = self
            .verifications
            .update_status(verification.id, target)
            .await?;

        info!(
            verification_id = %verification.id,
            status = %updated.status,
            "投递回执已落账"
        );

        // delivered/read 都不是终态，这里实际是空操作，保持与回复路径同构
        self.orchestrator
            .finalize_verification(verification.id, target)
            .await?;

        Ok(ReconcileOutcome::Applied {
            verification_id: verification.id,
            status: target,
        })
    }
}
