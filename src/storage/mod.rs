/// ストレージポート
///
/// 連絡先・貸付・返済の3種類のエンティティに対するCRUD操作を定義します。
/// 物理的な保存形式はバックエンドごとに異なりますが、以下の契約はすべての
/// バックエンドで守られます：
/// - 書き込みは1エンティティ単位でアトミック（失敗時に部分的な変更は見えない）
/// - 貸付の削除は返済へ、連絡先の削除は貸付と返済へカスケードする
/// - 一覧の並び順（連絡先は名前の昇順、貸付は貸付日の降順、返済は返済日の降順）
/// - ファイルやデータベースへのI/Oは非同期タスクのスレッドで実行しない
pub mod json_file;
pub mod memory;
pub mod sqlite;

pub use json_file::JsonFileStorage;
pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use crate::models::{Contact, ContactUpdate, Loan, LoanUpdate, Repayment};
use crate::shared::config::EnvironmentConfig;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 台帳ストレージのインターフェース
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// ログ出力用のバックエンド名
    fn backend_name(&self) -> &'static str;

    /// 連絡先を作成する（IDが重複する場合は `DuplicateKey`）
    async fn create_contact(&self, contact: &Contact) -> AppResult<()>;
    /// 連絡先一覧を名前の昇順で取得する
    async fn list_contacts(&self) -> AppResult<Vec<Contact>>;
    async fn get_contact(&self, id: &str) -> AppResult<Option<Contact>>;
    /// 指定されたフィールドのみを更新する（存在しない場合は `NotFound`）
    async fn update_contact(&self, id: &str, update: &ContactUpdate) -> AppResult<Contact>;
    /// 連絡先と、その貸付・返済をまとめて削除する（存在しない場合は何もしない）
    async fn delete_contact(&self, id: &str) -> AppResult<()>;

    /// 貸付を作成する（`DuplicateKey` または `ForeignKeyViolation`）
    async fn create_loan(&self, loan: &Loan) -> AppResult<()>;
    /// 貸付一覧を貸付日の降順で取得する
    async fn list_loans(&self, contact_id: Option<&str>) -> AppResult<Vec<Loan>>;
    async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>>;
    /// 返済期日・メモ・添付ファイルのみを更新し、`updated_at` を必ず更新する
    async fn update_loan(&self, id: &str, update: &LoanUpdate) -> AppResult<Loan>;
    /// 貸付と、その返済をまとめて削除する（存在しない場合は何もしない）
    async fn delete_loan(&self, id: &str) -> AppResult<()>;

    /// 返済を作成する（`DuplicateKey` または `ForeignKeyViolation`）
    async fn create_repayment(&self, repayment: &Repayment) -> AppResult<()>;
    /// 返済一覧を返済日の降順で取得する
    async fn list_repayments(&self, loan_id: Option<&str>) -> AppResult<Vec<Repayment>>;
    /// 返済を削除する（存在しない場合は何もしない）
    async fn delete_repayment(&self, id: &str) -> AppResult<()>;

    /// すべてのデータを削除する（テスト・リセット用）
    async fn clear_all(&self) -> AppResult<()>;
}

/// ストレージバックエンドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// プロセス内のマップ（永続化なし）
    Memory,
    /// JSONファイルによるキーバリューストア
    JsonFile,
    /// SQLiteデータベース
    Sqlite,
}

impl StorageBackend {
    /// 設定値として使用する名前
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::JsonFile => "json",
            StorageBackend::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "json" | "json_file" => Ok(StorageBackend::JsonFile),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(AppError::configuration(format!(
                "不明なストレージバックエンドです: {other}（memory / json / sqlite のいずれかを指定してください）"
            ))),
        }
    }
}

/// 設定に応じたストレージバックエンドを開く
///
/// # 引数
/// * `config` - 環境設定
///
/// # 戻り値
/// ストレージ、または失敗時はエラー
pub fn open_storage(config: &EnvironmentConfig) -> AppResult<Arc<dyn LedgerStorage>> {
    let path = config.storage_path();
    let require_path = || {
        path.clone().ok_or_else(|| {
            AppError::configuration(format!(
                "{}バックエンドにはストレージパスが必要です",
                config.storage_backend
            ))
        })
    };

    let storage: Arc<dyn LedgerStorage> = match config.storage_backend {
        StorageBackend::Memory => Arc::new(InMemoryStorage::new()),
        StorageBackend::JsonFile => Arc::new(JsonFileStorage::open(require_path()?)?),
        StorageBackend::Sqlite => {
            let sqlite = SqliteStorage::open(require_path()?)?;
            sqlite.set_busy_timeout(config.storage_timeout)?;
            Arc::new(sqlite)
        }
    };

    log::info!(
        "ストレージを初期化しました: backend={}, path={:?}",
        storage.backend_name(),
        path
    );

    Ok(storage)
}

/// ブロッキングI/Oを専用スレッドで実行する
///
/// 呼び出し側のタイムアウトが先に切れた場合、処理はスレッド上で最後まで続く。
pub(crate) async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        AppError::storage_unavailable(format!("ストレージ処理のタスクが異常終了しました: {e}"))
    })?
}

/// 連絡先の並び順（名前の昇順、同名はID順）
pub(crate) fn contact_order(a: &Contact, b: &Contact) -> Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}

/// 貸付の並び順（貸付日の降順、同日はID順）
pub(crate) fn loan_order(a: &Loan, b: &Loan) -> Ordering {
    b.date_issued
        .cmp(&a.date_issued)
        .then_with(|| a.id.cmp(&b.id))
}

/// 返済の並び順（返済日の降順、同日はID順）
pub(crate) fn repayment_order(a: &Repayment, b: &Repayment) -> Ordering {
    b.repayment_date
        .cmp(&a.repayment_date)
        .then_with(|| a.id.cmp(&b.id))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert_eq!(
            " JSON ".parse::<StorageBackend>().unwrap(),
            StorageBackend::JsonFile
        );
        assert_eq!(
            "sqlite".parse::<StorageBackend>().unwrap(),
            StorageBackend::Sqlite
        );

        let result = "indexeddb".parse::<StorageBackend>();
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_storage_backend_round_trip_name() {
        for backend in [
            StorageBackend::Memory,
            StorageBackend::JsonFile,
            StorageBackend::Sqlite,
        ] {
            assert_eq!(backend.to_string().parse::<StorageBackend>().unwrap(), backend);
        }
    }
}
