use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 返済データモデル
///
/// `repayment_date` は実際に支払われた日時、`created_at` はレコード作成日時。
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Repayment {
    pub id: String,
    pub loan_id: String,
    pub amount: Decimal,
    pub repayment_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub attachment_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repayment {
    /// 作成用DTOから返済を組み立てる
    pub fn from_new(input: NewRepayment, id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            loan_id: input.loan_id,
            amount: input.amount,
            repayment_date: input.repayment_date,
            notes: input.notes,
            attachment_uri: input.attachment_uri,
            created_at,
        }
    }
}

impl PartialEq for Repayment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Repayment {}

/// 返済作成用DTO
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewRepayment {
    pub loan_id: String,
    pub amount: Decimal,
    pub repayment_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub attachment_uri: Option<String>,
}
