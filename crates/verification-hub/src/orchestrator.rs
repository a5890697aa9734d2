//! 核验编排器
//!
//! 新订单的完整处理流水线：资格判定 -> 订单落库 -> 配额预占 ->
//! 核验建档 -> 消息下发 -> 状态回写。任一环节在预占之后失败，
//! 都会归还配额名额并把核验记录置为 failed，保证账本不多扣。
//!
//! 幂等性依赖两条唯一约束而非应用层加锁：
//! 订单的 (integration_id, external_order_id) 与核验记录的 order_id。
//! 并发投递中输掉建档竞争的一方读取胜者记录后按"已存在"收敛。

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::{current_period_start, resolve_plan};
use crate::eligibility::EligibilityEvaluator;
use crate::error::Result;
use crate::models::{Integration, NewVerification, NormalizedOrder, Order, VerificationStatus};
use crate::outbound::{MessageDispatcher, OrderTagger, VerificationMessage};
use crate::quota::{QuotaLedger, ReserveSlotParams};
use crate::repository::{OrderRepository, VerificationRepository};

/// 确认终态回写到平台订单的标签
pub const CONFIRMED_TAG: &str = "Akeed: Confirmed";
/// 取消终态回写到平台订单的标签
pub const CANCELED_TAG: &str = "Akeed: Canceled";

/// 订单接收结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderIntake {
    /// 订单不进入核验流程（不合格或平台未支持），不产生任何持久化
    Skipped { reason: String },
    /// 订单已落库并有对应的核验记录（含配额拒绝产生的 failed 记录）
    Accepted {
        order_id: Uuid,
        verification_id: Uuid,
    },
}

/// 核验编排器
pub struct VerificationOrchestrator {
    eligibility: EligibilityEvaluator,
    orders: Arc<dyn OrderRepository>,
    verifications: Arc<dyn VerificationRepository>,
    quota: Arc<dyn QuotaLedger>,
    dispatcher: Arc<dyn MessageDispatcher>,
    tagger: Arc<dyn OrderTagger>,
}

impl VerificationOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        verifications: Arc<dyn VerificationRepository>,
        quota: Arc<dyn QuotaLedger>,
        dispatcher: Arc<dyn MessageDispatcher>,
        tagger: Arc<dyn OrderTagger>,
    ) -> Self {
        Self {
            eligibility: EligibilityEvaluator::new(),
            orders,
            verifications,
            quota,
            dispatcher,
            tagger,
        }
    }

    /// 处理一条标准化后的新订单
    ///
    /// webhook 重复投递、并发投递都会收敛到同一条核验记录；
    /// 返回 Err 仅表示基础设施故障（数据库、消息通道），
    /// 业务上的拒绝通过 `OrderIntake::Skipped` 或 failed 核验记录表达。
    pub async fn handle_new_order(
        &self,
        normalized: &NormalizedOrder,
        integration: &Integration,
    ) -> Result<OrderIntake> {
        // 1. 资格判定（纯函数，无副作用）
        let outcome = self.eligibility.evaluate(normalized, integration);
        if !outcome.eligible {
            info!(
                external_order_id = %normalized.external_order_id,
                reason = %outcome.reason,
                "订单不需要 COD 核验，跳过"
            );
            return Ok(OrderIntake::Skipped {
                reason: outcome.reason.as_str().to_string(),
            });
        }

        // 2. 订单落库（幂等键裁决重复投递）
        let order = self.upsert_order(normalized).await?;

        // 3. 已有核验记录则直接收敛，不重复下发
        if let Some(existing) = self.verifications.find_by_order_id(order.id).await? {
            info!(
                order_id = %order.id,
                verification_id = %existing.id,
                status = %existing.status,
                "订单已有核验记录，按重复投递处理"
            );
            return Ok(OrderIntake::Accepted {
                order_id: order.id,
                verification_id: existing.id,
            });
        }

        // 4. 配额预占
        let plan = resolve_plan(integration.billing_plan_id.as_deref());
        let period_start = current_period_start(Utc::now());
        let reservation = self
            .quota
            .reserve(ReserveSlotParams {
                org_id: integration.org_id,
                integration_id: integration.id,
                period_start,
                included_limit: plan.included_verifications(),
            })
            .await?;

        if !reservation.allowed {
            return self.record_quota_denial(&order, reservation.consumed_count, reservation.included_limit, period_start).await;
        }

        // 5. 核验建档；输掉并发竞争时归还名额并收敛到胜者
        let verification = match self
            .verifications
            .create(NewVerification::pending(order.org_id, order.id))
            .await
        {
            Ok(verification) => verification,
            Err(err) if err.is_unique_violation() => {
                self.release_quota_best_effort(integration.id, period_start)
                    .await;
                match self.verifications.find_by_order_id(order.id).await? {
                    Some(winner) => {
                        info!(
                            order_id = %order.id,
                            verification_id = %winner.id,
                            "并发建档竞争失败，收敛到已有核验记录"
                        );
                        return Ok(OrderIntake::Accepted {
                            order_id: order.id,
                            verification_id: winner.id,
                        });
                    }
                    None => return Err(err),
                }
            }
            Err(err) => {
                self.release_quota_best_effort(integration.id, period_start)
                    .await;
                return Err(err);
            }
        };

        // 6. 下发确认消息
        let message = VerificationMessage {
            to_phone: normalized.customer_phone.clone(),
            order_number: normalized.order_number.clone(),
            amount: normalized.total_price.clone(),
            currency: normalized.currency.clone(),
            verification_id: verification.id,
        };

        match self.dispatcher.dispatch(&message).await {
            Ok(receipt) => match receipt.provider_message_id {
                Some(provider_message_id) => {
                    self.verifications
                        .mark_sent(verification.id, &provider_message_id)
                        .await?;
                    info!(
                        order_id = %order.id,
                        verification_id = %verification.id,
                        provider_message_id = %provider_message_id,
                        "核验消息已下发"
                    );
                }
                None => {
                    // 通道接受了请求但没回消息标识，后续回执无法对账，按失败补偿
                    warn!(
                        verification_id = %verification.id,
                        "消息通道未返回消息标识，按下发失败处理"
                    );
                    self.release_quota_best_effort(integration.id, period_start)
                        .await;
                    self.mark_failed_best_effort(
                        verification.id,
                        json!({"reason": "missing_provider_message_id"}),
                    )
                    .await;
                }
            },
            Err(err) => {
                self.release_quota_best_effort(integration.id, period_start)
                    .await;
                self.mark_failed_best_effort(
                    verification.id,
                    json!({"reason": "dispatch_error", "error": err.to_string()}),
                )
                .await;
                return Err(err);
            }
        }

        Ok(OrderIntake::Accepted {
            order_id: order.id,
            verification_id: verification.id,
        })
    }

    /// 终态回写：在平台订单上打确认/取消标签
    ///
    /// 标签是商家侧的展示信息，回写失败只记录不阻断状态迁移。
    pub async fn finalize_verification(
        &self,
        verification_id: Uuid,
        status: VerificationStatus,
    ) -> Result<()> {
        let tag = match status {
            VerificationStatus::Confirmed => CONFIRMED_TAG,
            VerificationStatus::Canceled => CANCELED_TAG,
            _ => return Ok(()),
        };

        let Some(verification) = self.verifications.find_by_id(verification_id).await? else {
            warn!(verification_id = %verification_id, "终态回写：核验记录不存在");
            return Ok(());
        };

        let Some(order) = self.orders.find_by_id(verification.order_id).await? else {
            warn!(order_id = %verification.order_id, "终态回写：订单不存在");
            return Ok(());
        };

        let Some(integration_id) = order.integration_id else {
            warn!(order_id = %order.id, "终态回写：订单无关联集成");
            return Ok(());
        };

        if let Err(err) = self
            .tagger
            .add_order_tag(integration_id, &order.external_order_id, tag)
            .await
        {
            warn!(
                order_id = %order.id,
                tag,
                error = %err,
                "订单标签回写失败，已忽略"
            );
        }

        Ok(())
    }

    /// 订单落库，输掉并发插入竞争时读取胜者
    async fn upsert_order(&self, normalized: &NormalizedOrder) -> Result<Order> {
        if let Some(existing) = self
            .orders
            .find_by_external_id(normalized.integration_id, &normalized.external_order_id)
            .await?
        {
            return Ok(existing);
        }

        match self.orders.create(normalized).await {
            Ok(order) => Ok(order),
            Err(err) if err.is_unique_violation() => {
                match self
                    .orders
                    .find_by_external_id(normalized.integration_id, &normalized.external_order_id)
                    .await?
                {
                    Some(winner) => Ok(winner),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// 配额拒绝：落一条 failed 核验记录留痕，不下发消息
    async fn record_quota_denial(
        &self,
        order: &Order,
        consumed_count: i32,
        included_limit: i32,
        period_start: chrono::NaiveDate,
    ) -> Result<OrderIntake> {
        let metadata = json!({
            "reason": "plan_limit_reached",
            "consumed_count": consumed_count,
            "included_limit": included_limit,
            "period_start": period_start.to_string(),
        });

        let verification = match self
            .verifications
            .create(NewVerification::failed(order.org_id, order.id, metadata))
            .await
        {
            Ok(verification) => verification,
            Err(err) if err.is_unique_violation() => {
                match self.verifications.find_by_order_id(order.id).await? {
                    Some(winner) => winner,
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        warn!(
            order_id = %order.id,
            verification_id = %verification.id,
            consumed_count,
            included_limit,
            "月度配额已用尽，核验记录落为 failed"
        );

        Ok(OrderIntake::Accepted {
            order_id: order.id,
            verification_id: verification.id,
        })
    }

    async fn release_quota_best_effort(
        &self,
        integration_id: Uuid,
        period_start: chrono::NaiveDate,
    ) {
        if let Err(err) = self.quota.release(integration_id, period_start).await {
            error!(
                integration_id = %integration_id,
                error = %err,
                "配额归还失败，账本可能多扣一个名额"
            );
        }
    }

    async fn mark_failed_best_effort(&self, verification_id: Uuid, metadata: serde_json::Value) {
        if let Err(err) = self.verifications.mark_failed(verification_id, metadata).await {
            error!(
                verification_id = %verification_id,
                error = %err,
                "核验记录置失败状态时出错"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    struct Harness {
        orders: Arc<InMemoryOrders>,
        verifications: Arc<InMemoryVerifications>,
        quota: Arc<FakeQuota>,
        dispatcher: Arc<FakeDispatcher>,
        tagger: Arc<FakeTagger>,
        orchestrator: VerificationOrchestrator,
    }

    impl Harness {
        fn new(
            orders: InMemoryOrders,
            verifications: InMemoryVerifications,
            quota: FakeQuota,
            dispatcher: FakeDispatcher,
            tagger: FakeTagger,
        ) -> Self {
            let orders = Arc::new(orders);
            let verifications = Arc::new(verifications);
            let quota = Arc::new(quota);
            let dispatcher = Arc::new(dispatcher);
            let tagger = Arc::new(tagger);
            let orchestrator = VerificationOrchestrator::new(
                orders.clone(),
                verifications.clone(),
                quota.clone(),
                dispatcher.clone(),
                tagger.clone(),
            );
            Self {
                orders,
                verifications,
                quota,
                dispatcher,
                tagger,
                orchestrator,
            }
        }

        fn default() -> Self {
            Self::new(
                InMemoryOrders::default(),
                InMemoryVerifications::default(),
                FakeQuota::with_limit(50),
                FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.1")),
                FakeTagger::default(),
            )
        }
    }

    fn accepted_ids(intake: OrderIntake) -> (Uuid, Uuid) {
        match intake {
            OrderIntake::Accepted {
                order_id,
                verification_id,
            } => (order_id, verification_id),
            other => panic!("期望 Accepted，实际 {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ineligible_order_leaves_no_trace() {
        let harness = Harness::default();
        let integration = make_integration();
        let mut order = make_normalized_order(&integration);
        order.payment_method = "visa".to_string();
        order.raw_payload = serde_json::json!({});

        let intake = harness
            .orchestrator
            .handle_new_order(&order, &integration)
            .await
            .unwrap();

        assert_eq!(
            intake,
            OrderIntake::Skipped {
                reason: "non_cod_payment_method".to_string()
            }
        );
        assert_eq!(harness.orders.count(), 0);
        assert_eq!(harness.verifications.count(), 0);
        assert_eq!(harness.quota.consumed(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_happy_path_dispatches_and_marks_sent() {
        let harness = Harness::default();
        let integration = make_integration();
        let order = make_normalized_order(&integration);

        let intake = harness
            .orchestrator
            .handle_new_order(&order, &integration)
            .await
            .unwrap();

        let (_, verification_id) = accepted_ids(intake);
        let verification = harness.verifications.get(verification_id).unwrap();
        assert_eq!(verification.status, VerificationStatus::Sent);
        assert_eq!(
            verification.provider_message_id.as_deref(),
            Some("wamid.test.1")
        );
        assert_eq!(verification.attempts, 1);
        assert!(verification.last_sent_at.is_some());
        assert_eq!(harness.quota.consumed(), 1);
        assert_eq!(harness.dispatcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_converges_without_redispatch() {
        let integration = make_integration();
        let normalized = make_normalized_order(&integration);
        let order_row = make_order_row(&normalized);
        let mut existing =
            make_verification(order_row.org_id, order_row.id, VerificationStatus::Sent);
        existing.provider_message_id = Some("wamid.prev".to_string());

        let harness = Harness::new(
            InMemoryOrders::with_order(order_row.clone()),
            InMemoryVerifications::with_verification(existing.clone()),
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.2")),
            FakeTagger::default(),
        );

        let intake = harness
            .orchestrator
            .handle_new_order(&normalized, &integration)
            .await
            .unwrap();

        let (order_id, verification_id) = accepted_ids(intake);
        assert_eq!(order_id, order_row.id);
        assert_eq!(verification_id, existing.id);
        // 不重复下发、不重复扣配额、不重复落库
        assert_eq!(harness.dispatcher.calls(), 0);
        assert_eq!(harness.quota.consumed(), 0);
        assert_eq!(harness.orders.count(), 1);
        assert_eq!(harness.verifications.count(), 1);
    }

    #[tokio::test]
    async fn test_quota_denial_records_failed_verification() {
        let harness = Harness::new(
            InMemoryOrders::default(),
            InMemoryVerifications::default(),
            FakeQuota::exhausted(50),
            FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.3")),
            FakeTagger::default(),
        );
        let integration = make_integration();
        let order = make_normalized_order(&integration);

        let intake = harness
            .orchestrator
            .handle_new_order(&order, &integration)
            .await
            .unwrap();

        let (_, verification_id) = accepted_ids(intake);
        let verification = harness.verifications.get(verification_id).unwrap();
        assert_eq!(verification.status, VerificationStatus::Failed);
        assert_eq!(verification.metadata["reason"], "plan_limit_reached");
        assert_eq!(verification.metadata["consumed_count"], 50);
        assert_eq!(verification.metadata["included_limit"], 50);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_compensates_quota_and_fails_verification() {
        let harness = Harness::new(
            InMemoryOrders::default(),
            InMemoryVerifications::default(),
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::Fail),
            FakeTagger::default(),
        );
        let integration = make_integration();
        let order = make_normalized_order(&integration);

        let err = harness
            .orchestrator
            .handle_new_order(&order, &integration)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::HubError::Dispatch(_)));

        // 名额已归还，核验记录落为 failed 留痕
        assert_eq!(harness.quota.consumed(), 0);
        assert_eq!(harness.quota.release_calls(), 1);
        assert_eq!(harness.verifications.count(), 1);
        let verification = harness.verifications.first().unwrap();
        assert_eq!(verification.status, VerificationStatus::Failed);
        assert_eq!(verification.metadata["reason"], "dispatch_error");
    }

    #[tokio::test]
    async fn test_missing_message_id_is_business_failure() {
        let harness = Harness::new(
            InMemoryOrders::default(),
            InMemoryVerifications::default(),
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::MissingMessageId),
            FakeTagger::default(),
        );
        let integration = make_integration();
        let order = make_normalized_order(&integration);

        // 通道没抛错，所以返回 Ok
        let intake = harness
            .orchestrator
            .handle_new_order(&order, &integration)
            .await
            .unwrap();

        let (_, verification_id) = accepted_ids(intake);
        let verification = harness.verifications.get(verification_id).unwrap();
        assert_eq!(verification.status, VerificationStatus::Failed);
        assert_eq!(
            verification.metadata["reason"],
            "missing_provider_message_id"
        );
        assert_eq!(harness.quota.consumed(), 0);
        assert_eq!(harness.quota.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_loser_converges_to_winner() {
        let integration = make_integration();
        let normalized = make_normalized_order(&integration);
        let order_row = make_order_row(&normalized);
        let winner =
            make_verification(order_row.org_id, order_row.id, VerificationStatus::Pending);

        let verifications = InMemoryVerifications::default();
        verifications.stage_conflict_winner(winner.clone());

        let harness = Harness::new(
            InMemoryOrders::with_order(order_row),
            verifications,
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.4")),
            FakeTagger::default(),
        );

        let intake = harness
            .orchestrator
            .handle_new_order(&normalized, &integration)
            .await
            .unwrap();

        let (_, verification_id) = accepted_ids(intake);
        assert_eq!(verification_id, winner.id);
        // 输家归还自己预占的名额，且不替胜者下发
        assert_eq!(harness.quota.release_calls(), 1);
        assert_eq!(harness.quota.consumed(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_finalize_confirmed_tags_platform_order() {
        let integration = make_integration();
        let normalized = make_normalized_order(&integration);
        let order_row = make_order_row(&normalized);
        let verification = make_verification(
            order_row.org_id,
            order_row.id,
            VerificationStatus::Confirmed,
        );

        let harness = Harness::new(
            InMemoryOrders::with_order(order_row.clone()),
            InMemoryVerifications::with_verification(verification.clone()),
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.5")),
            FakeTagger::default(),
        );

        harness
            .orchestrator
            .finalize_verification(verification.id, VerificationStatus::Confirmed)
            .await
            .unwrap();

        let tags = harness.tagger.tags();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].0, integration.id);
        assert_eq!(tags[0].1, order_row.external_order_id);
        assert_eq!(tags[0].2, CONFIRMED_TAG);
    }

    #[tokio::test]
    async fn test_finalize_non_terminal_status_is_noop() {
        let harness = Harness::default();

        harness
            .orchestrator
            .finalize_verification(Uuid::new_v4(), VerificationStatus::Delivered)
            .await
            .unwrap();

        assert!(harness.tagger.tags().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_swallows_tagging_failure() {
        let integration = make_integration();
        let normalized = make_normalized_order(&integration);
        let order_row = make_order_row(&normalized);
        let verification =
            make_verification(order_row.org_id, order_row.id, VerificationStatus::Canceled);

        let harness = Harness::new(
            InMemoryOrders::with_order(order_row),
            InMemoryVerifications::with_verification(verification.clone()),
            FakeQuota::with_limit(50),
            FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test.6")),
            FakeTagger::failing(),
        );

        // 打标签失败不冒泡
        harness
            .orchestrator
            .finalize_verification(verification.id, VerificationStatus::Canceled)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_finalize_missing_verification_is_noop() {
        let harness = Harness::default();

        harness
            .orchestrator
            .finalize_verification(Uuid::new_v4(), VerificationStatus::Confirmed)
            .await
            .unwrap();

        assert!(harness.tagger.tags().is_empty());
    }
}
