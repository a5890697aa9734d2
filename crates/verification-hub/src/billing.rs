//! 计费计划与月度权益解析
//!
//! 计划目录是写死的常量表：计划变更走发版而非配置，
//! 避免线上配置漂移导致配额上限与计费口径不一致。

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::warn;

/// 计费计划
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BillingPlanId {
    /// 免费档
    #[default]
    Starter,
    Growth,
    Pro,
    Scale,
}

impl BillingPlanId {
    /// 大小写不敏感地解析计划 ID，未知计划返回 None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "starter" => Some(Self::Starter),
            "growth" => Some(Self::Growth),
            "pro" => Some(Self::Pro),
            "scale" => Some(Self::Scale),
            _ => None,
        }
    }

    /// 每月包含的核验条数
    pub fn included_verifications(&self) -> i32 {
        match self {
            Self::Starter => 50,
            Self::Growth => 500,
            Self::Pro => 1000,
            Self::Scale => 2500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Growth => "growth",
            Self::Pro => "pro",
            Self::Scale => "scale",
        }
    }
}

impl std::fmt::Display for BillingPlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 解析集成上的计划 ID，缺失或非法时回退到 Starter
///
/// 回退档位按最严格的上限执行，商家侧配置修复后下一次预占立即生效。
pub fn resolve_plan(raw_plan_id: Option<&str>) -> BillingPlanId {
    match raw_plan_id.and_then(BillingPlanId::parse) {
        Some(plan) => plan,
        None => {
            warn!(
                raw_plan_id = raw_plan_id.unwrap_or("<none>"),
                "集成的计费计划缺失或非法，按 starter 档执行配额"
            );
            BillingPlanId::default()
        }
    }
}

/// 当前使用周期起点：当月 UTC 一日
pub fn current_period_start(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .expect("month start is always a valid date")
}
