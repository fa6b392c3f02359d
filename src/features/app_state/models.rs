use crate::models::Repayment;
use crate::shared::config::{EnvironmentConfig, DEFAULT_STORAGE_TIMEOUT_MS};
use crate::shared::errors::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 残高を超える返済の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    /// 記録した上で警告を返す（残高は負になる）
    #[default]
    AllowWithWarning,
    /// ストレージに触れる前に `Overpayment` エラーで拒否する
    Reject,
}

impl OverpaymentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverpaymentPolicy::AllowWithWarning => "allow_with_warning",
            OverpaymentPolicy::Reject => "reject",
        }
    }
}

impl fmt::Display for OverpaymentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverpaymentPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow_with_warning" | "allow" | "warn" => Ok(OverpaymentPolicy::AllowWithWarning),
            "reject" => Ok(OverpaymentPolicy::Reject),
            other => Err(AppError::configuration(format!(
                "不明な過払いポリシーです: {other}（allow_with_warning / reject のいずれかを指定してください）"
            ))),
        }
    }
}

/// 過払いの警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverpaymentWarning {
    pub loan_id: String,
    /// 返済前の残高
    pub balance_before: Decimal,
    /// 残高を超えた金額
    pub excess: Decimal,
}

/// 記録された返済と、過払いの場合はその警告
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRepayment {
    pub repayment: Repayment,
    pub warning: Option<OverpaymentWarning>,
}

/// 台帳の動作設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub overpayment_policy: OverpaymentPolicy,
    /// ストレージ呼び出し1回あたりのタイムアウト
    pub storage_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            overpayment_policy: OverpaymentPolicy::default(),
            storage_timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        }
    }
}

impl LedgerSettings {
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self {
            overpayment_policy: config.overpayment_policy,
            storage_timeout: config.storage_timeout,
        }
    }
}
