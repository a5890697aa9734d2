//! 电话号码标准化模块
//!
//! 将商家平台回传的各种格式的客户电话统一为 E.164 格式，
//! 供消息通道直接使用。解析失败一律返回 `InvalidPhoneNumber`，
//! 由调用方决定是跳过订单还是向上报告。

use crate::error::{AkeedError, Result};

/// E.164 允许的最大数字位数
const E164_MAX_DIGITS: usize = 15;
/// 低于此位数的号码不可能是完整的国际号码
const E164_MIN_DIGITS: usize = 8;

/// ISO 3166-1 alpha-2 国家代码到国际电话区号的映射
///
/// 覆盖产品当前服务的市场；不在表内的国家必须由平台回传带区号的号码。
const DIALING_PREFIXES: &[(&str, &str)] = &[
    ("SA", "966"),
    ("AE", "971"),
    ("KW", "965"),
    ("QA", "974"),
    ("BH", "973"),
    ("OM", "968"),
    ("EG", "20"),
    ("JO", "962"),
    ("IQ", "964"),
    ("LB", "961"),
    ("MA", "212"),
    ("DZ", "213"),
    ("TN", "216"),
    ("TR", "90"),
    ("US", "1"),
    ("GB", "44"),
    ("IN", "91"),
    ("PK", "92"),
];

/// 电话号码标准化服务
///
/// 无状态纯函数集合，保留 struct 形态以便作为依赖注入到各 spoke。
#[derive(Debug, Clone, Copy, Default)]
pub struct PhoneService;

impl PhoneService {
    pub fn new() -> Self {
        Self
    }

    /// 将电话号码标准化为 E.164 格式
    ///
    /// - 去除空白与常见分隔符
    /// - 前导 `00` 视同 `+`
    /// - 无国际前缀时依据 ISO 国家代码补全区号，并去除本地号码的前导 0
    pub fn standardize(&self, phone: &str, country_code: Option<&str>) -> Result<String> {
        let trimmed = phone.trim();
        if trimmed.is_empty() {
            return Err(AkeedError::InvalidPhoneNumber("电话号码为空".to_string()));
        }

        let mut cleaned: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '/'))
            .collect();

        // 国际拨号前缀 00 等价于 +
        if let Some(rest) = cleaned.strip_prefix("00") {
            cleaned = format!("+{rest}");
        }

        let digits = if let Some(rest) = cleaned.strip_prefix('+') {
            rest.to_string()
        } else {
            let prefix = country_code
                .map(|code| code.trim().to_uppercase())
                .filter(|code| !code.is_empty())
                .and_then(|code| Self::dialing_prefix(&code))
                .ok_or_else(|| {
                    AkeedError::InvalidPhoneNumber(format!(
                        "无法确定国家区号: phone={trimmed}"
                    ))
                })?;

            // 本地格式的前导 0 在加区号后去除
            let national = cleaned.trim_start_matches('0');
            format!("{prefix}{national}")
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(AkeedError::InvalidPhoneNumber(format!(
                "电话号码格式无效: {trimmed}"
            )));
        }

        if digits.len() < E164_MIN_DIGITS || digits.len() > E164_MAX_DIGITS {
            return Err(AkeedError::InvalidPhoneNumber(format!(
                "电话号码位数不合法: {trimmed}"
            )));
        }

        Ok(format!("+{digits}"))
    }

    fn dialing_prefix(iso_code: &str) -> Option<&'static str> {
        DIALING_PREFIXES
            .iter()
            .find(|(code, _)| *code == iso_code)
            .map(|(_, prefix)| *prefix)
    }
}
