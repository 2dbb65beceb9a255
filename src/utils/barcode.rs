use regex::Regex;

use crate::config::BarcodeConfig;
use crate::error::{AppError, AppResult};

/// 早期版本使用的严格格式：U 开头加 12 位数字
pub const STRICT_U12_PATTERN: &str = r"^U\d{12}$";
pub const STRICT_U12_MESSAGE: &str = "Barcode must be U followed by 12 digits";
pub const EMPTY_BARCODE_MESSAGE: &str = "Barcode must not be empty";

/// 条码校验策略
///
/// 非空校验始终生效；格式校验可通过配置开启，用于只接受特定编码规则的场景。
#[derive(Debug, Clone, Default)]
pub enum BarcodePolicy {
    #[default]
    NonEmpty,
    Pattern { regex: Regex, message: String },
}

impl BarcodePolicy {
    pub fn pattern(pattern: &str, message: impl Into<String>) -> AppResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| AppError::ConfigError(format!("Invalid barcode pattern: {e}")))?;
        Ok(BarcodePolicy::Pattern {
            regex,
            message: message.into(),
        })
    }

    pub fn strict_u12() -> Self {
        // 常量正则，编译不会失败
        BarcodePolicy::Pattern {
            regex: Regex::new(STRICT_U12_PATTERN).expect("static barcode pattern"),
            message: STRICT_U12_MESSAGE.to_string(),
        }
    }

    pub fn from_config(config: &BarcodeConfig) -> AppResult<Self> {
        match config.pattern.as_deref() {
            None | Some("") => Ok(BarcodePolicy::NonEmpty),
            Some(pattern) => {
                let message = config
                    .pattern_message
                    .clone()
                    .unwrap_or_else(|| format!("Barcode must match {pattern}"));
                Self::pattern(pattern, message)
            }
        }
    }

    /// 校验并返回规整后的条码（去掉首尾空白，扫码枪常带换行）
    pub fn validate(&self, raw: &str) -> AppResult<String> {
        let barcode = raw.trim();
        if barcode.is_empty() {
            return Err(AppError::ValidationError(EMPTY_BARCODE_MESSAGE.to_string()));
        }

        if let BarcodePolicy::Pattern { regex, message } = self
            && !regex.is_match(barcode)
        {
            return Err(AppError::ValidationError(message.clone()));
        }

        Ok(barcode.to_string())
    }
}
