//! Shopify 订单的 COD 资格策略
//!
//! Shopify 订单上的支付方式散落在多个字段，且命名随支付网关各异。
//! 策略按优先级收集标准化支付信号，再与多语言 COD 词表匹配：
//! 1. 标准化订单的 payment_method 字段
//! 2. raw_payload.payment_gateway_names[]
//! 3. raw_payload.gateway
//! 4. raw_payload.transactions[].gateway

use std::sync::LazyLock;

use regex::Regex;

use super::{EligibilityOutcome, EligibilityReason, EligibilityStrategy};
use crate::models::NormalizedOrder;

/// COD 支付信号词表（英文 + 阿拉伯文），对标准化后的信号做匹配
static COD_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bcod\b",
        r"\bcash\s*on\s*delivery\b",
        r"\bcash\s*on\s*receipt\b",
        r"\bcollect\s*on\s*delivery\b",
        r"\bpay\s*on\s*delivery\b",
        r"الدفع\s*عند\s*الاستلام",
        r"كاش\s*عند\s*الاستلام",
    ]
    .iter()
    .map(|pattern| {
        Regex::new(&format!("(?i){pattern}")).expect("COD matcher pattern is valid")
    })
    .collect()
});

/// Shopify 资格策略
#[derive(Debug, Default, Clone, Copy)]
pub struct ShopifyEligibility;

impl EligibilityStrategy for ShopifyEligibility {
    fn evaluate(&self, order: &NormalizedOrder) -> EligibilityOutcome {
        let signals = collect_payment_signals(order);

        if signals.is_empty() {
            return EligibilityOutcome::ineligible(EligibilityReason::MissingPaymentSignal);
        }

        match signals.into_iter().find(|signal| is_cod_signal(signal)) {
            Some(signal) => EligibilityOutcome::eligible(signal),
            None => EligibilityOutcome::ineligible(EligibilityReason::NonCodPaymentMethod),
        }
    }
}

/// 按优先级收集标准化且去重后的支付信号
fn collect_payment_signals(order: &NormalizedOrder) -> Vec<String> {
    let mut signals: Vec<String> = Vec::new();

    push_signal(&mut signals, &order.payment_method);

    let Some(raw) = order.raw_payload.as_object() else {
        return signals;
    };

    if let Some(gateway_names) = raw.get("payment_gateway_names").and_then(|v| v.as_array()) {
        for name in gateway_names {
            if let Some(name) = name.as_str() {
                push_signal(&mut signals, name);
            }
        }
    }

    if let Some(gateway) = raw.get("gateway").and_then(|v| v.as_str()) {
        push_signal(&mut signals, gateway);
    }

    if let Some(transactions) = raw.get("transactions").and_then(|v| v.as_array()) {
        for transaction in transactions {
            if let Some(gateway) = transaction.get("gateway").and_then(|v| v.as_str()) {
                push_signal(&mut signals, gateway);
            }
        }
    }

    signals
}

fn push_signal(target: &mut Vec<String>, value: &str) {
    let normalized = normalize_signal(value);
    if normalized.is_empty() || target.contains(&normalized) {
        return;
    }
    target.push(normalized);
}

/// 信号标准化：小写、下划线/连字符转空格、空白折叠
fn normalize_signal(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let mut result = String::with_capacity(lowered.len());
    let mut last_was_space = false;

    for c in lowered.chars() {
        let mapped = if matches!(c, '_' | '-') || c.is_whitespace() {
            ' '
        } else {
            c
        };

        if mapped == ' ' {
            if !last_was_space && !result.is_empty() {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(mapped);
            last_was_space = false;
        }
    }

    result.trim_end().to_string()
}

fn is_cod_signal(signal: &str) -> bool {
    COD_MATCHERS.iter().any(|matcher| matcher.is_match(signal))
}
