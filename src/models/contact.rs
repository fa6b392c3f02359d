use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 連絡先データモデル
///
/// 同一性は `id` のみで判定する。
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// 作成用DTOから連絡先を組み立てる
    pub fn from_new(input: NewContact, id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name,
            phone_number: input.phone_number,
            email: input.email,
            created_at,
        }
    }

    /// 指定されたフィールドのみを更新する
    pub fn apply_update(&mut self, update: &ContactUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(phone_number) = &update.phone_number {
            self.phone_number = phone_number.clone();
        }
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

/// 連絡先作成用DTO
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

/// 連絡先更新用DTO
///
/// `phone_number` と `email` は `Some(None)` でクリアできる。
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub phone_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub email: Option<Option<String>>,
}

impl ContactUpdate {
    /// 変更対象のフィールドが1つもないかどうか
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone_number.is_none() && self.email.is_none()
    }
}
