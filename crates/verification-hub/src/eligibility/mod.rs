//! 订单核验资格判定
//!
//! 纯函数、确定性、无 I/O：按集成的平台类型路由到对应策略，
//! 策略从订单的多个字段收集支付信号并与 COD 词表匹配。
//! 平台注册表是封闭枚举（见 `PlatformType`），未支持的平台
//! 显式落到 unsupported_platform，不会静默跳过。

pub mod shopify;

use tracing::warn;

use crate::models::{Integration, NormalizedOrder, PlatformType};
use shopify::ShopifyEligibility;

/// 判定结果原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    /// 命中 COD 支付信号
    CodMatch,
    /// 有支付信号但均非 COD
    NonCodPaymentMethod,
    /// 订单上找不到任何支付信号
    MissingPaymentSignal,
    /// 集成的平台类型没有配置资格策略
    UnsupportedPlatform,
}

impl EligibilityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodMatch => "cod_match",
            Self::NonCodPaymentMethod => "non_cod_payment_method",
            Self::MissingPaymentSignal => "missing_payment_signal",
            Self::UnsupportedPlatform => "unsupported_platform",
        }
    }
}

impl std::fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityOutcome {
    pub eligible: bool,
    pub reason: EligibilityReason,
    /// 命中的标准化支付信号（仅 cod_match 时存在）
    pub matched_signal: Option<String>,
}

impl EligibilityOutcome {
    pub fn eligible(matched_signal: String) -> Self {
        Self {
            eligible: true,
            reason: EligibilityReason::CodMatch,
            matched_signal: Some(matched_signal),
        }
    }

    pub fn ineligible(reason: EligibilityReason) -> Self {
        Self {
            eligible: false,
            reason,
            matched_signal: None,
        }
    }
}

/// 平台资格策略契约
pub trait EligibilityStrategy: Send + Sync {
    fn evaluate(&self, order: &NormalizedOrder) -> EligibilityOutcome;
}

/// 资格判定器
///
/// 持有各平台策略的固定注册表。当前只有 Shopify 实现了策略，
/// 其余平台变体与无法解析的平台字符串统一返回 unsupported_platform。
#[derive(Default)]
pub struct EligibilityEvaluator {
    shopify: ShopifyEligibility,
}

impl EligibilityEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 判定订单是否需要 COD 核验
    pub fn evaluate(
        &self,
        order: &NormalizedOrder,
        integration: &Integration,
    ) -> EligibilityOutcome {
        let strategy: Option<&dyn EligibilityStrategy> = match integration.platform() {
            Some(PlatformType::Shopify) => Some(&self.shopify),
            Some(_) | None => None,
        };

        match strategy {
            Some(strategy) => strategy.evaluate(order),
            None => {
                warn!(
                    platform_type = %integration.platform_type,
                    external_order_id = %order.external_order_id,
                    "平台未配置 COD 资格策略，跳过订单"
                );
                EligibilityOutcome::ineligible(EligibilityReason::UnsupportedPlatform)
            }
        }
    }
}
