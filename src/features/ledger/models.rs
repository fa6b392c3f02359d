use crate::models::{Contact, Loan};
use crate::shared::errors::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 貸付の返済状況
///
/// 返済額の合計から毎回導出され、保存されることはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// 返済なし
    Pending,
    /// 一部返済済み
    Partial,
    /// 完済（過払いを含む）
    Repaid,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Partial => "partial",
            LoanStatus::Repaid => "repaid",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 貸付の導出値
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDetails {
    /// 返済額の合計
    pub total_paid: Decimal,
    /// 残高（過払いの場合は負）
    pub balance_due: Decimal,
    pub status: LoanStatus,
    /// 期日を過ぎていて残高がある
    pub overdue: bool,
}

/// 導出値付きの貸付
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanWithDetails {
    #[serde(flatten)]
    pub loan: Loan,
    #[serde(flatten)]
    pub details: LoanDetails,
}

/// 連絡先ごとの集計
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub contact: Contact,
    /// 貸付日の降順
    pub loans: Vec<LoanWithDetails>,
    /// 各貸付の残高の合計
    pub total_due: Decimal,
}

impl ContactSummary {
    /// 未完済の貸付のうち最も早い返済期日
    pub fn next_due_date(&self) -> Option<DateTime<Utc>> {
        self.loans
            .iter()
            .filter(|entry| entry.details.balance_due > Decimal::ZERO)
            .filter_map(|entry| entry.loan.due_date)
            .min()
    }

    /// 期日超過の貸付があるか
    pub fn has_overdue(&self) -> bool {
        self.loans.iter().any(|entry| entry.details.overdue)
    }
}

/// 全体の集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTotals {
    /// 未回収額（`total_loaned - total_repaid`）
    pub total_outstanding: Decimal,
    /// 貸付額の合計
    pub total_loaned: Decimal,
    /// 返済額の合計
    pub total_repaid: Decimal,
    /// 貸付の件数
    pub loans_count: usize,
}

/// 連絡先一覧の並べ替えキー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOption {
    #[default]
    Name,
    Amount,
    DueDate,
}

/// 並べ替えの方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOption {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(SortOption::Name),
            "amount" => Ok(SortOption::Amount),
            "duedate" | "due_date" => Ok(SortOption::DueDate),
            other => Err(AppError::validation(format!(
                "不明な並べ替えキーです: {other}"
            ))),
        }
    }
}

impl FromStr for SortDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(AppError::validation(format!(
                "不明な並べ替え方向です: {other}"
            ))),
        }
    }
}
