//! 测试用内存仓储与出站桩实现
//!
//! 编排器与对账器的测试需要跨多次调用观察状态变化
//! （补偿回滚、幂等重放），这里提供带内部状态的内存实现。
//! 适配层的服务测试通过 `test-support` feature 复用同一套桩。

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::models::{
    Integration, NewVerification, NormalizedOrder, Order, Verification, VerificationStatus,
};
use crate::outbound::{DispatchReceipt, MessageDispatcher, OrderTagger, VerificationMessage};
use crate::quota::{QuotaLedger, ReserveSlotParams, SlotReservation};
use crate::repository::{OrderRepository, VerificationRepository};
use akeed_shared::error::AkeedError;

fn unique_violation(entity: &str, field: &str, value: &str) -> HubError {
    HubError::Shared(AkeedError::AlreadyExists {
        entity: entity.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    })
}

// ==================== 测试数据 ====================

pub fn make_integration() -> Integration {
    Integration {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        platform_type: "shopify".to_string(),
        platform_store_url: "demo.myshopify.com".to_string(),
        store_name: Some("Demo Store".to_string()),
        access_token: Some("shpat_test".to_string()),
        is_active: true,
        is_auto_verify_enabled: true,
        billing_plan_id: Some("starter".to_string()),
        billing_status: None,
    }
}

pub fn make_normalized_order(integration: &Integration) -> NormalizedOrder {
    NormalizedOrder {
        org_id: integration.org_id,
        integration_id: integration.id,
        external_order_id: "1001".to_string(),
        order_number: "#1001".to_string(),
        customer_phone: "+966501234567".to_string(),
        customer_name: "Ahmed Ali".to_string(),
        customer_email: None,
        total_price: "199.00".to_string(),
        currency: "SAR".to_string(),
        payment_method: "cash on delivery (cod)".to_string(),
        raw_payload: json!({"id": 1001}),
    }
}

pub fn make_order_row(normalized: &NormalizedOrder) -> Order {
    Order {
        id: Uuid::new_v4(),
        org_id: normalized.org_id,
        integration_id: Some(normalized.integration_id),
        external_order_id: normalized.external_order_id.clone(),
        order_number: Some(normalized.order_number.clone()),
        customer_phone: normalized.customer_phone.clone(),
        customer_name: Some(normalized.customer_name.clone()),
        customer_email: normalized.customer_email.clone(),
        total_price: Some(normalized.total_price.clone()),
        currency: Some(normalized.currency.clone()),
        payment_method: Some(normalized.payment_method.clone()),
        raw_payload: Some(normalized.raw_payload.clone()),
        created_at: Utc::now(),
    }
}

pub fn make_verification(
    org_id: Uuid,
    order_id: Uuid,
    status: VerificationStatus,
) -> Verification {
    Verification {
        id: Uuid::new_v4(),
        org_id,
        order_id,
        status,
        provider_message_id: None,
        template_name: None,
        language_code: None,
        attempts: 0,
        last_sent_at: None,
        confirmed_at: None,
        canceled_at: None,
        expired_at: None,
        metadata: json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ==================== 订单仓储 ====================

#[derive(Default)]
pub struct InMemoryOrders {
    orders: Mutex<Vec<Order>>,
}

impl InMemoryOrders {
    pub fn with_order(order: Order) -> Self {
        Self {
            orders: Mutex::new(vec![order]),
        }
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrders {
    async fn find_by_external_id(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
    ) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| {
                o.integration_id == Some(integration_id)
                    && o.external_order_id == external_order_id
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    async fn create(&self, order: &NormalizedOrder) -> Result<Order> {
        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|o| {
            o.integration_id == Some(order.integration_id)
                && o.external_order_id == order.external_order_id
        }) {
            return Err(unique_violation(
                "orders",
                "external_order_id",
                &order.external_order_id,
            ));
        }
        let created = make_order_row(order);
        orders.push(created.clone());
        Ok(created)
    }
}

// ==================== 核验记录仓储 ====================

#[derive(Default)]
pub struct InMemoryVerifications {
    verifications: Mutex<Vec<Verification>>,
    /// 模拟并发建档竞争：下一次 create 先落入此记录再返回唯一冲突
    conflict_winner: Mutex<Option<Verification>>,
}

impl InMemoryVerifications {
    pub fn with_verification(verification: Verification) -> Self {
        Self {
            verifications: Mutex::new(vec![verification]),
            conflict_winner: Mutex::new(None),
        }
    }

    pub fn stage_conflict_winner(&self, winner: Verification) {
        *self.conflict_winner.lock().unwrap() = Some(winner);
    }

    pub fn get(&self, id: Uuid) -> Option<Verification> {
        self.verifications
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.id == id)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.verifications.lock().unwrap().len()
    }

    pub fn first(&self) -> Option<Verification> {
        self.verifications.lock().unwrap().first().cloned()
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> Result<Verification>
    where
        F: FnOnce(&mut Verification),
    {
        let mut verifications = self.verifications.lock().unwrap();
        let verification = verifications
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(HubError::VerificationNotFound(id))?;
        f(verification);
        verification.updated_at = Utc::now();
        Ok(verification.clone())
    }
}

#[async_trait]
impl VerificationRepository for InMemoryVerifications {
    async fn create(&self, new: NewVerification) -> Result<Verification> {
        if let Some(winner) = self.conflict_winner.lock().unwrap().take() {
            self.verifications.lock().unwrap().push(winner);
            return Err(unique_violation(
                "verifications",
                "order_id",
                &new.order_id.to_string(),
            ));
        }

        let mut verifications = self.verifications.lock().unwrap();
        if verifications.iter().any(|v| v.order_id == new.order_id) {
            return Err(unique_violation(
                "verifications",
                "order_id",
                &new.order_id.to_string(),
            ));
        }

        let mut verification = make_verification(new.org_id, new.order_id, new.status);
        verification.metadata = new.metadata;
        verifications.push(verification.clone());
        Ok(verification)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Verification>> {
        Ok(self.get(id))
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<Verification>> {
        Ok(self
            .verifications
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.order_id == order_id)
            .cloned())
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Verification>> {
        Ok(self
            .verifications
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: VerificationStatus) -> Result<Verification> {
        self.mutate(id, |v| {
            v.status = status;
            let now = Utc::now();
            match status {
                VerificationStatus::Confirmed => v.confirmed_at = Some(now),
                VerificationStatus::Canceled => v.canceled_at = Some(now),
                VerificationStatus::Expired => v.expired_at = Some(now),
                _ => {}
            }
        })
    }

    async fn mark_sent(&self, id: Uuid, provider_message_id: &str) -> Result<Verification> {
        self.mutate(id, |v| {
            v.status = VerificationStatus::Sent;
            v.provider_message_id = Some(provider_message_id.to_string());
            v.attempts += 1;
            v.last_sent_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, id: Uuid, metadata: serde_json::Value) -> Result<Verification> {
        self.mutate(id, |v| {
            v.status = VerificationStatus::Failed;
            if let (Some(base), Some(patch)) = (v.metadata.as_object_mut(), metadata.as_object()) {
                for (key, value) in patch {
                    base.insert(key.clone(), value.clone());
                }
            } else {
                v.metadata = metadata;
            }
        })
    }
}

// ==================== 配额账本 ====================

pub struct FakeQuota {
    limit: i32,
    consumed: Mutex<i32>,
    released: AtomicU32,
}

impl FakeQuota {
    pub fn with_limit(limit: i32) -> Self {
        Self {
            limit,
            consumed: Mutex::new(0),
            released: AtomicU32::new(0),
        }
    }

    pub fn exhausted(limit: i32) -> Self {
        Self {
            limit,
            consumed: Mutex::new(limit),
            released: AtomicU32::new(0),
        }
    }

    pub fn consumed(&self) -> i32 {
        *self.consumed.lock().unwrap()
    }

    pub fn release_calls(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotaLedger for FakeQuota {
    async fn reserve(&self, params: ReserveSlotParams) -> Result<SlotReservation> {
        let mut consumed = self.consumed.lock().unwrap();
        if *consumed >= self.limit {
            return Ok(SlotReservation {
                allowed: false,
                consumed_count: *consumed,
                included_limit: params.included_limit,
            });
        }
        *consumed += 1;
        Ok(SlotReservation {
            allowed: true,
            consumed_count: *consumed,
            included_limit: params.included_limit,
        })
    }

    async fn release(&self, _integration_id: Uuid, _period_start: NaiveDate) -> Result<()> {
        let mut consumed = self.consumed.lock().unwrap();
        *consumed = (*consumed - 1).max(0);
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== 消息通道 ====================

pub enum DispatchBehavior {
    /// 下发成功并返回消息标识
    Succeed(&'static str),
    /// 通道接受请求但未返回消息标识
    MissingMessageId,
    /// 下发失败
    Fail,
}

pub struct FakeDispatcher {
    behavior: DispatchBehavior,
    calls: AtomicU32,
}

impl FakeDispatcher {
    pub fn new(behavior: DispatchBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageDispatcher for FakeDispatcher {
    async fn dispatch(&self, _message: &VerificationMessage) -> Result<DispatchReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            DispatchBehavior::Succeed(wamid) => Ok(DispatchReceipt {
                provider_message_id: Some(wamid.to_string()),
            }),
            DispatchBehavior::MissingMessageId => Ok(DispatchReceipt {
                provider_message_id: None,
            }),
            DispatchBehavior::Fail => Err(HubError::Dispatch("通道不可用".to_string())),
        }
    }
}

// ==================== 订单打标签 ====================

#[derive(Default)]
pub struct FakeTagger {
    fail: bool,
    tags: Mutex<Vec<(Uuid, String, String)>>,
}

impl FakeTagger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            tags: Mutex::new(Vec::new()),
        }
    }

    pub fn tags(&self) -> Vec<(Uuid, String, String)> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderTagger for FakeTagger {
    async fn add_order_tag(
        &self,
        integration_id: Uuid,
        external_order_id: &str,
        tag: &str,
    ) -> Result<()> {
        if self.fail {
            return Err(HubError::Tagging("平台 API 不可用".to_string()));
        }
        self.tags.lock().unwrap().push((
            integration_id,
            external_order_id.to_string(),
            tag.to_string(),
        ));
        Ok(())
    }
}
