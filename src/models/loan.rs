use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 貸付データモデル
///
/// 返済合計・残高・ステータスは保存せず、集計エンジンで毎回導出する。
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub contact_id: String,
    pub amount: Decimal,
    pub date_issued: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub attachment_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// 作成用DTOから貸付を組み立てる
    pub fn from_new(input: NewLoan, id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            contact_id: input.contact_id,
            amount: input.amount,
            date_issued: input.date_issued,
            due_date: input.due_date,
            notes: input.notes,
            attachment_uri: input.attachment_uri,
            created_at: now,
            updated_at: now,
        }
    }

    /// 変更可能なフィールドのみを更新する
    ///
    /// 変更の有無にかかわらず `updated_at` を更新する。
    pub fn apply_update(&mut self, update: &LoanUpdate, now: DateTime<Utc>) {
        if let Some(due_date) = update.due_date {
            self.due_date = due_date;
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
        if let Some(attachment_uri) = &update.attachment_uri {
            self.attachment_uri = attachment_uri.clone();
        }
        self.updated_at = now;
    }
}

impl PartialEq for Loan {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Loan {}

/// 貸付作成用DTO
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    pub contact_id: String,
    pub amount: Decimal,
    pub date_issued: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub attachment_uri: Option<String>,
}

/// 貸付更新用DTO
///
/// 連絡先と金額は作成後に変更できないため含まない。
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoanUpdate {
    #[serde(default, deserialize_with = "super::double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub attachment_uri: Option<Option<String>>,
}

impl LoanUpdate {
    /// 変更対象のフィールドが1つもないかどうか
    pub fn is_empty(&self) -> bool {
        self.due_date.is_none() && self.notes.is_none() && self.attachment_uri.is_none()
    }
}
