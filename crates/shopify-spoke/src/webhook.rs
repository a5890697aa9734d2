//! Shopify 订单 webhook 处理
//!
//! orders/create 的处理入口：传输级去重 -> 集成与计费闸门 ->
//! payload 标准化 -> 交给核验编排器。所有业务性的跳过
//! （店铺未接入、计费阻断、取不到电话）都确认 webhook 而不报错，
//! 避免 Shopify 对无法处理的订单无限重试。

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use akeed_shared::phone::PhoneService;
use verification_hub::models::{Integration, NormalizedOrder};
use verification_hub::orchestrator::{OrderIntake, VerificationOrchestrator};
use verification_hub::repository::IntegrationRepository;

use crate::error::{Result, ShopifyError};
use crate::events_repo::WebhookEventStore;

/// 客人下单（未登录）时的占位客户名
const GUEST_CUSTOMER_NAME: &str = "Guest";

/// webhook 确认结果
///
/// received=false 表示订单没有进入核验流水线（去重、闸门或标准化失败），
/// 但 webhook 本身已被确认。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    pub duplicate: bool,
    pub intake: Option<OrderIntake>,
}

impl WebhookAck {
    fn skipped() -> Self {
        Self {
            received: false,
            duplicate: false,
            intake: None,
        }
    }

    fn duplicate() -> Self {
        Self {
            received: false,
            duplicate: true,
            intake: None,
        }
    }

    fn processed(intake: OrderIntake) -> Self {
        Self {
            received: true,
            duplicate: false,
            intake: Some(intake),
        }
    }
}

// ==================== webhook payload 模型 ====================

/// orders/create webhook 的订单 payload（只取本域用到的字段）
#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyOrderPayload {
    pub id: i64,
    /// 展示用订单号，形如 "#1001"
    pub name: Option<String>,
    pub order_number: Option<i64>,
    pub email: Option<String>,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub currency: Option<String>,
    pub total_price: Option<String>,
    pub gateway: Option<String>,
    #[serde(default)]
    pub payment_gateway_names: Vec<String>,
    pub customer: Option<ShopifyCustomer>,
    pub billing_address: Option<ShopifyAddress>,
    pub shipping_address: Option<ShopifyAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyCustomer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub default_address: Option<ShopifyAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyAddress {
    pub phone: Option<String>,
    /// ISO 3166-1 alpha-2 国家码，电话标准化时用于补国际区号
    pub country_code: Option<String>,
}

impl ShopifyOrderPayload {
    /// 按优先级列出电话候选及其所属地址的国家码
    fn phone_candidates(&self) -> Vec<(&str, Option<&str>)> {
        let mut candidates: Vec<(Option<&String>, Option<&String>)> = Vec::new();

        candidates.push((self.phone.as_ref(), None));
        if let Some(customer) = &self.customer {
            candidates.push((customer.phone.as_ref(), None));
            if let Some(address) = &customer.default_address {
                candidates.push((address.phone.as_ref(), address.country_code.as_ref()));
            }
        }
        if let Some(address) = &self.billing_address {
            candidates.push((address.phone.as_ref(), address.country_code.as_ref()));
        }
        if let Some(address) = &self.shipping_address {
            candidates.push((address.phone.as_ref(), address.country_code.as_ref()));
        }

        candidates
            .into_iter()
            .filter_map(|(phone, country)| {
                phone.map(|p| (p.as_str(), country.map(|c| c.as_str())))
            })
            .collect()
    }

    /// 支付方式：网关名列表拼接，为空时退回 gateway 字段
    fn payment_method(&self) -> String {
        if !self.payment_gateway_names.is_empty() {
            return self.payment_gateway_names.join(", ");
        }
        self.gateway.clone().unwrap_or_default()
    }

    fn customer_name(&self) -> String {
        let name = self
            .customer
            .as_ref()
            .map(|c| {
                [c.first_name.as_deref(), c.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        if name.trim().is_empty() {
            GUEST_CUSTOMER_NAME.to_string()
        } else {
            name.trim().to_string()
        }
    }

    fn order_number(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.order_number
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| self.id.to_string())
    }
}

// ==================== webhook 服务 ====================

/// Shopify 订单 webhook 服务
pub struct ShopifyOrderWebhookService {
    integrations: Arc<dyn IntegrationRepository>,
    events: Arc<dyn WebhookEventStore>,
    orchestrator: Arc<VerificationOrchestrator>,
    phone: PhoneService,
}

impl ShopifyOrderWebhookService {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        events: Arc<dyn WebhookEventStore>,
        orchestrator: Arc<VerificationOrchestrator>,
    ) -> Self {
        Self {
            integrations,
            events,
            orchestrator,
            phone: PhoneService::new(),
        }
    }

    /// 处理 orders/create webhook
    ///
    /// 返回 Err 仅代表基础设施故障，调用方应让 Shopify 重试；
    /// 业务上不处理的订单一律返回已确认的 `WebhookAck`。
    pub async fn handle_order_create(
        &self,
        payload: serde_json::Value,
        shop_domain: &str,
        webhook_id: Option<&str>,
        topic: &str,
    ) -> Result<WebhookAck> {
        let Some(integration) = self
            .integrations
            .find_by_platform_domain(shop_domain, "shopify")
            .await
            .map_err(ShopifyError::Hub)?
        else {
            warn!(shop_domain, "店铺未接入，webhook 已确认并跳过");
            return Ok(WebhookAck::skipped());
        };

        // 传输级去重；无 webhook id 时只能依赖业务幂等键
        if let Some(webhook_id) = webhook_id {
            let first_delivery = self
                .events
                .record_if_new(webhook_id, topic, shop_domain, integration.org_id, integration.id)
                .await?;
            if !first_delivery {
                info!(webhook_id, shop_domain, "重复的 webhook 投递，直接确认");
                return Ok(WebhookAck::duplicate());
            }
        }

        if integration.is_billing_blocked() {
            warn!(
                integration_id = %integration.id,
                billing_status = integration.billing_status.as_deref().unwrap_or("<none>"),
                "集成被计费状态阻断，webhook 已确认并跳过"
            );
            return Ok(WebhookAck::skipped());
        }

        if !integration.is_auto_verify_enabled {
            info!(
                integration_id = %integration.id,
                "商家关闭了自动核验，webhook 已确认并跳过"
            );
            return Ok(WebhookAck::skipped());
        }

        let order: ShopifyOrderPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ShopifyError::InvalidPayload(e.to_string()))?;

        let Some(normalized) = self.normalize(&order, &integration, payload) else {
            warn!(
                integration_id = %integration.id,
                external_order_id = order.id,
                "订单缺少可用的客户电话，webhook 已确认并跳过"
            );
            return Ok(WebhookAck::skipped());
        };

        let intake = self
            .orchestrator
            .handle_new_order(&normalized, &integration)
            .await
            .map_err(ShopifyError::Hub)?;

        Ok(WebhookAck::processed(intake))
    }

    /// 标准化订单；取不到可用电话时返回 None
    fn normalize(
        &self,
        order: &ShopifyOrderPayload,
        integration: &Integration,
        raw_payload: serde_json::Value,
    ) -> Option<NormalizedOrder> {
        let customer_phone = self.resolve_phone(order)?;

        Some(NormalizedOrder {
            org_id: integration.org_id,
            integration_id: integration.id,
            external_order_id: order.id.to_string(),
            order_number: order.order_number(),
            customer_phone,
            customer_name: order.customer_name(),
            customer_email: order
                .email
                .clone()
                .or_else(|| order.contact_email.clone()),
            total_price: order.total_price.clone().unwrap_or_default(),
            currency: order.currency.clone().unwrap_or_default(),
            payment_method: order.payment_method(),
            raw_payload,
        })
    }

    /// 逐个尝试电话候选，第一个能标准化为 E.164 的胜出
    fn resolve_phone(&self, order: &ShopifyOrderPayload) -> Option<String> {
        for (candidate, country_code) in order.phone_candidates() {
            match self.phone.standardize(candidate, country_code) {
                Ok(phone) => return Some(phone),
                Err(err) => {
                    warn!(candidate, error = %err, "电话候选无法标准化，尝试下一个");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use verification_hub::models::VerificationStatus;
    use verification_hub::testing::{
        DispatchBehavior, FakeDispatcher, FakeQuota, FakeTagger, InMemoryOrders,
        InMemoryVerifications, make_integration,
    };

    use crate::events_repo::MockWebhookEventStore;

    fn sample_payload() -> serde_json::Value {
        json!({
            "id": 5678901234_i64,
            "name": "#1001",
            "order_number": 1001,
            "email": "ahmed@example.com",
            "phone": null,
            "currency": "SAR",
            "total_price": "199.00",
            "gateway": "Cash on Delivery (COD)",
            "payment_gateway_names": ["Cash on Delivery (COD)"],
            "customer": {
                "first_name": "Ahmed",
                "last_name": "Ali",
                "phone": "+966 50 123 4567",
                "default_address": {
                    "phone": "0501234567",
                    "country_code": "SA"
                }
            },
            "billing_address": {
                "phone": "0501234567",
                "country_code": "SA"
            },
            "shipping_address": {
                "phone": null,
                "country_code": "SA"
            }
        })
    }

    fn parse(payload: serde_json::Value) -> ShopifyOrderPayload {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn test_payload_deserialization() {
        let order = parse(sample_payload());
        assert_eq!(order.id, 5678901234);
        assert_eq!(order.name.as_deref(), Some("#1001"));
        assert_eq!(order.payment_gateway_names.len(), 1);
        assert!(order.phone.is_none());
        assert_eq!(
            order.customer.as_ref().unwrap().phone.as_deref(),
            Some("+966 50 123 4567")
        );
    }

    #[test]
    fn test_minimal_payload_deserialization() {
        // Shopify 会省略空字段，缺字段不能让解析失败
        let order = parse(json!({"id": 42}));
        assert_eq!(order.id, 42);
        assert!(order.payment_gateway_names.is_empty());
        assert!(order.customer.is_none());
    }

    #[test]
    fn test_phone_candidate_priority() {
        let mut payload = sample_payload();
        payload["phone"] = json!("+966555000111");
        let order = parse(payload);

        let candidates = order.phone_candidates();
        // 订单级电话优先于客户与地址上的电话
        assert_eq!(candidates[0], ("+966555000111", None));
        assert_eq!(candidates[1], ("+966 50 123 4567", None));
        assert_eq!(candidates[2], ("0501234567", Some("SA")));
        // shipping_address.phone 为 null，不进入候选
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_payment_method_prefers_gateway_names() {
        let order = parse(sample_payload());
        assert_eq!(order.payment_method(), "Cash on Delivery (COD)");

        let mut payload = sample_payload();
        payload["payment_gateway_names"] = json!(["cod", "gift_card"]);
        assert_eq!(parse(payload).payment_method(), "cod, gift_card");

        let mut payload = sample_payload();
        payload["payment_gateway_names"] = json!([]);
        assert_eq!(parse(payload).payment_method(), "Cash on Delivery (COD)");
    }

    #[test]
    fn test_customer_name_guest_fallback() {
        let order = parse(sample_payload());
        assert_eq!(order.customer_name(), "Ahmed Ali");

        let mut payload = sample_payload();
        payload["customer"]["first_name"] = json!(null);
        payload["customer"]["last_name"] = json!(null);
        assert_eq!(parse(payload).customer_name(), "Guest");

        let mut payload = sample_payload();
        payload["customer"] = json!(null);
        assert_eq!(parse(payload).customer_name(), "Guest");
    }

    #[test]
    fn test_order_number_fallbacks() {
        assert_eq!(parse(sample_payload()).order_number(), "#1001");

        let order = parse(json!({"id": 42, "order_number": 1001}));
        assert_eq!(order.order_number(), "#1001");

        let order = parse(json!({"id": 42}));
        assert_eq!(order.order_number(), "42");
    }

    // ==================== 服务流程 ====================

    /// 按域名返回固定集成的仓储桩
    struct StubIntegrations {
        integration: Option<Integration>,
    }

    #[async_trait]
    impl IntegrationRepository for StubIntegrations {
        async fn find_by_id(
            &self,
            id: Uuid,
        ) -> verification_hub::Result<Option<Integration>> {
            Ok(self.integration.clone().filter(|i| i.id == id))
        }

        async fn find_by_platform_domain(
            &self,
            domain: &str,
            platform_type: &str,
        ) -> verification_hub::Result<Option<Integration>> {
            Ok(self.integration.clone().filter(|i| {
                i.platform_store_url == domain && i.platform_type == platform_type
            }))
        }
    }

    struct Harness {
        service: ShopifyOrderWebhookService,
        orders: Arc<InMemoryOrders>,
        verifications: Arc<InMemoryVerifications>,
        dispatcher: Arc<FakeDispatcher>,
    }

    fn harness(integration: Option<Integration>, events: MockWebhookEventStore) -> Harness {
        let orders = Arc::new(InMemoryOrders::default());
        let verifications = Arc::new(InMemoryVerifications::default());
        let dispatcher = Arc::new(FakeDispatcher::new(DispatchBehavior::Succeed("wamid.test")));

        let orchestrator = Arc::new(VerificationOrchestrator::new(
            orders.clone(),
            verifications.clone(),
            Arc::new(FakeQuota::with_limit(50)),
            dispatcher.clone(),
            Arc::new(FakeTagger::default()),
        ));

        let service = ShopifyOrderWebhookService::new(
            Arc::new(StubIntegrations { integration }),
            Arc::new(events),
            orchestrator,
        );

        Harness {
            service,
            orders,
            verifications,
            dispatcher,
        }
    }

    /// 去重仓储放行（首次投递）
    fn first_delivery_events() -> MockWebhookEventStore {
        let mut events = MockWebhookEventStore::new();
        events
            .expect_record_if_new()
            .returning(|_, _, _, _, _| Ok(true));
        events
    }

    async fn handle(harness: &Harness, payload: serde_json::Value) -> WebhookAck {
        harness
            .service
            .handle_order_create(payload, "demo.myshopify.com", Some("wh-1"), "orders/create")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_shop_is_acked_and_skipped() {
        // 去重仓储无任何预期：未接入的店铺不该产生事件记录
        let harness = harness(None, MockWebhookEventStore::new());

        let ack = handle(&harness, sample_payload()).await;

        assert_eq!(ack, WebhookAck::skipped());
        assert_eq!(harness.orders.count(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_without_processing() {
        let mut events = MockWebhookEventStore::new();
        events
            .expect_record_if_new()
            .returning(|_, _, _, _, _| Ok(false));
        let harness = harness(Some(make_integration()), events);

        let ack = handle(&harness, sample_payload()).await;

        assert!(ack.duplicate);
        assert!(!ack.received);
        assert_eq!(harness.orders.count(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_billing_blocked_integration_is_skipped() {
        let mut integration = make_integration();
        integration.billing_status = Some("frozen".to_string());
        let harness = harness(Some(integration), first_delivery_events());

        let ack = handle(&harness, sample_payload()).await;

        assert_eq!(ack, WebhookAck::skipped());
        assert_eq!(harness.orders.count(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_auto_verify_disabled_is_skipped() {
        let mut integration = make_integration();
        integration.is_auto_verify_enabled = false;
        let harness = harness(Some(integration), first_delivery_events());

        let ack = handle(&harness, sample_payload()).await;

        assert_eq!(ack, WebhookAck::skipped());
        assert_eq!(harness.orders.count(), 0);
    }

    #[tokio::test]
    async fn test_order_without_usable_phone_is_skipped() {
        let harness = harness(Some(make_integration()), first_delivery_events());

        let mut payload = sample_payload();
        payload["customer"]["phone"] = json!(null);
        payload["customer"]["default_address"] = json!(null);
        payload["billing_address"] = json!(null);
        payload["shipping_address"] = json!(null);

        let ack = handle(&harness, payload).await;

        assert_eq!(ack, WebhookAck::skipped());
        assert_eq!(harness.orders.count(), 0);
        assert_eq!(harness.dispatcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cod_order_flows_into_verification() {
        let harness = harness(Some(make_integration()), first_delivery_events());

        let ack = handle(&harness, sample_payload()).await;

        assert!(ack.received);
        let Some(OrderIntake::Accepted {
            verification_id, ..
        }) = ack.intake
        else {
            panic!("COD 订单应进入核验流程: {:?}", ack.intake);
        };

        let verification = harness.verifications.get(verification_id).unwrap();
        assert_eq!(verification.status, VerificationStatus::Sent);
        assert_eq!(harness.orders.count(), 1);
        assert_eq!(harness.dispatcher.calls(), 1);
    }
}
