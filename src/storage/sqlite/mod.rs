/// SQLiteバックエンド
///
/// テーブルごとのリポジトリ関数（`contacts` / `loans` / `repayments`）を
/// 共有接続の上で呼び出す。金額はTEXT、日時は固定幅のRFC3339文字列で保存するため、
/// 文字列の並び順がそのまま時系列順になる。
pub mod contacts;
pub mod loans;
pub mod repayments;

use super::{run_blocking, LedgerStorage};
use crate::models::{Contact, ContactUpdate, Loan, LoanUpdate, Repayment};
use crate::shared::database::{initialize_database, initialize_in_memory_database};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLiteによるストレージ
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// データベースファイルを開く（テーブルが存在しない場合は作成する）
    ///
    /// # 引数
    /// * `path` - データベースファイルのパス
    ///
    /// # 戻り値
    /// ストレージ、または失敗時はエラー
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let conn = initialize_database(path.as_ref())?;
        Ok(Self::from_connection(conn))
    }

    /// メモリ上のデータベースで開く
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = initialize_in_memory_database()?;
        Ok(Self::from_connection(conn))
    }

    /// 初期化済みの接続からストレージを作成する
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// ロック待ちの上限を設定する
    ///
    /// 他の接続が書き込みロックを保持している場合、この時間を過ぎると
    /// `StorageUnavailable` を返す。
    pub fn set_busy_timeout(&self, timeout: Duration) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|e| {
            AppError::storage_unavailable(format!("データベースのロックエラー: {e}"))
        })?;
        conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// 接続を取得してリポジトリ関数をブロッキング用スレッドで実行する
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                AppError::storage_unavailable(format!("データベースのロックエラー: {e}"))
            })?;
            f(&conn)
        })
        .await
    }
}

#[async_trait]
impl LedgerStorage for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_contact(&self, contact: &Contact) -> AppResult<()> {
        let contact = contact.clone();
        self.with_conn(move |conn| contacts::insert(conn, &contact))
            .await
    }

    async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        self.with_conn(contacts::find_all).await
    }

    async fn get_contact(&self, id: &str) -> AppResult<Option<Contact>> {
        let id = id.to_string();
        self.with_conn(move |conn| contacts::find_by_id(conn, &id))
            .await
    }

    async fn update_contact(&self, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn(move |conn| contacts::update(conn, &id, &update))
            .await
    }

    async fn delete_contact(&self, id: &str) -> AppResult<()> {
        let owned_id = id.to_string();
        let removed_loans = self
            .with_conn(move |conn| contacts::delete_cascade(conn, &owned_id))
            .await?;
        log::debug!("連絡先を削除しました: id={id}, 削除された貸付={removed_loans}件");
        Ok(())
    }

    async fn create_loan(&self, loan: &Loan) -> AppResult<()> {
        let loan = loan.clone();
        self.with_conn(move |conn| loans::insert(conn, &loan)).await
    }

    async fn list_loans(&self, contact_id: Option<&str>) -> AppResult<Vec<Loan>> {
        let contact_id = contact_id.map(str::to_string);
        self.with_conn(move |conn| loans::find_all(conn, contact_id.as_deref()))
            .await
    }

    async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>> {
        let id = id.to_string();
        self.with_conn(move |conn| loans::find_by_id(conn, &id)).await
    }

    async fn update_loan(&self, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn(move |conn| loans::update(conn, &id, &update))
            .await
    }

    async fn delete_loan(&self, id: &str) -> AppResult<()> {
        let owned_id = id.to_string();
        let removed_repayments = self
            .with_conn(move |conn| loans::delete_cascade(conn, &owned_id))
            .await?;
        log::debug!("貸付を削除しました: id={id}, 削除された返済={removed_repayments}件");
        Ok(())
    }

    async fn create_repayment(&self, repayment: &Repayment) -> AppResult<()> {
        let repayment = repayment.clone();
        self.with_conn(move |conn| repayments::insert(conn, &repayment))
            .await
    }

    async fn list_repayments(&self, loan_id: Option<&str>) -> AppResult<Vec<Repayment>> {
        let loan_id = loan_id.map(str::to_string);
        self.with_conn(move |conn| repayments::find_all(conn, loan_id.as_deref()))
            .await
    }

    async fn delete_repayment(&self, id: &str) -> AppResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| repayments::delete(conn, &id))
            .await
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM repayments", [])?;
            tx.execute("DELETE FROM loans", [])?;
            tx.execute("DELETE FROM contacts", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// 日時を保存用の文字列に変換する
pub(crate) fn to_db_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn to_db_optional_timestamp(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(to_db_timestamp)
}

pub(crate) fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

pub(crate) fn get_optional_timestamp(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| parse_timestamp(idx, &value)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn get_amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// INSERT時の制約違反をドメインのエラーに変換する
///
/// # 引数
/// * `error` - rusqliteのエラー
/// * `resource` - 挿入しようとしたリソース名と、そのID
/// * `parent` - 参照先のリソース名と、そのID
pub(crate) fn map_insert_error(
    error: rusqlite::Error,
    resource: (&str, &str),
    parent: (&str, &str),
) -> AppError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        match failure.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return AppError::duplicate_key(resource.0, resource.1);
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return AppError::foreign_key(parent.0, parent.1);
            }
            _ => {}
        }
    }
    error.into()
}
