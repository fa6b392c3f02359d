use super::memory::LedgerTables;
use super::{run_blocking, LedgerStorage};
use crate::models::{Contact, ContactUpdate, Loan, LoanUpdate, Repayment};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// JSONファイルによるキーバリューストア
///
/// 台帳全体を1つのJSONドキュメントとして保存する。書き込みはコピーに対して
/// 行い、一時ファイルへの書き出しとリネームが成功してからメモリ上の状態を
/// 差し替えるため、失敗した書き込みが後続の読み込みに見えることはない。
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    tables: Arc<Mutex<LedgerTables>>,
}

impl JsonFileStorage {
    /// ストアファイルを開く（存在しない場合は空の台帳で開始する）
    ///
    /// # 引数
    /// * `path` - JSONファイルのパス
    ///
    /// # 戻り値
    /// ストレージ、または失敗時はエラー
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::storage_unavailable(format!(
                        "ストアディレクトリの作成に失敗しました: {e}"
                    ))
                })?;
            }
        }

        let tables = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                AppError::storage_unavailable(format!(
                    "ストアファイルの読み込みに失敗しました: {e}"
                ))
            })?;
            if content.trim().is_empty() {
                LedgerTables::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            log::info!("新規ストアファイルを作成します: {:?}", path);
            LedgerTables::default()
        };

        log::debug!(
            "JSONストアを読み込みました: 連絡先={}件, 貸付={}件, 返済={}件",
            tables.contacts.len(),
            tables.loans.len(),
            tables.repayments.len()
        );

        Ok(Self {
            path,
            tables: Arc::new(Mutex::new(tables)),
        })
    }

    /// ストアファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&LedgerTables) -> T + Send + 'static,
        T: Send + 'static,
    {
        let tables = Arc::clone(&self.tables);
        run_blocking(move || {
            let guard = lock_tables(&tables)?;
            Ok(f(&guard))
        })
        .await
    }

    /// コピーに変更を適用し、永続化に成功した場合のみ反映する
    async fn mutate<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut LedgerTables) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let tables = Arc::clone(&self.tables);
        let path = self.path.clone();
        run_blocking(move || {
            let mut guard = lock_tables(&tables)?;
            let mut draft = guard.clone();
            let result = f(&mut draft)?;
            persist(&path, &draft)?;
            *guard = draft;
            Ok(result)
        })
        .await
    }
}

fn lock_tables(tables: &Mutex<LedgerTables>) -> AppResult<MutexGuard<'_, LedgerTables>> {
    tables
        .lock()
        .map_err(|e| AppError::storage_unavailable(format!("JSONストアのロックエラー: {e}")))
}

/// 一時ファイルに書き出してからリネームする
fn persist(path: &Path, tables: &LedgerTables) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(tables)?;
    let tmp_path = path.with_extension("json.tmp");

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    write_result.map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        log::error!("ストアファイルの書き込みに失敗しました: {:?}: {e}", path);
        AppError::storage_unavailable(format!("ストアファイルの書き込みに失敗しました: {e}"))
    })
}

#[async_trait]
impl LedgerStorage for JsonFileStorage {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    async fn create_contact(&self, contact: &Contact) -> AppResult<()> {
        let contact = contact.clone();
        self.mutate(move |tables| tables.insert_contact(&contact))
            .await
    }

    async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        self.read(|tables| tables.sorted_contacts()).await
    }

    async fn get_contact(&self, id: &str) -> AppResult<Option<Contact>> {
        let id = id.to_string();
        self.read(move |tables| tables.contacts.get(&id).cloned())
            .await
    }

    async fn update_contact(&self, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
        let id = id.to_string();
        let update = update.clone();
        self.mutate(move |tables| tables.update_contact(&id, &update))
            .await
    }

    async fn delete_contact(&self, id: &str) -> AppResult<()> {
        let owned_id = id.to_string();
        let removed_loans = self
            .mutate(move |tables| Ok(tables.remove_contact(&owned_id)))
            .await?;
        log::debug!("連絡先を削除しました: id={id}, 削除された貸付={removed_loans}件");
        Ok(())
    }

    async fn create_loan(&self, loan: &Loan) -> AppResult<()> {
        let loan = loan.clone();
        self.mutate(move |tables| tables.insert_loan(&loan)).await
    }

    async fn list_loans(&self, contact_id: Option<&str>) -> AppResult<Vec<Loan>> {
        let contact_id = contact_id.map(str::to_string);
        self.read(move |tables| tables.sorted_loans(contact_id.as_deref()))
            .await
    }

    async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>> {
        let id = id.to_string();
        self.read(move |tables| tables.loans.get(&id).cloned()).await
    }

    async fn update_loan(&self, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
        let id = id.to_string();
        let update = update.clone();
        self.mutate(move |tables| tables.update_loan(&id, &update))
            .await
    }

    async fn delete_loan(&self, id: &str) -> AppResult<()> {
        let owned_id = id.to_string();
        let removed_repayments = self
            .mutate(move |tables| Ok(tables.remove_loan(&owned_id)))
            .await?;
        log::debug!("貸付を削除しました: id={id}, 削除された返済={removed_repayments}件");
        Ok(())
    }

    async fn create_repayment(&self, repayment: &Repayment) -> AppResult<()> {
        let repayment = repayment.clone();
        self.mutate(move |tables| tables.insert_repayment(&repayment))
            .await
    }

    async fn list_repayments(&self, loan_id: Option<&str>) -> AppResult<Vec<Repayment>> {
        let loan_id = loan_id.map(str::to_string);
        self.read(move |tables| tables.sorted_repayments(loan_id.as_deref()))
            .await
    }

    async fn delete_repayment(&self, id: &str) -> AppResult<()> {
        let id = id.to_string();
        self.mutate(move |tables| {
            tables.repayments.remove(&id);
            Ok(())
        })
        .await
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.mutate(|tables| {
            tables.clear();
            Ok(())
        })
        .await
    }
}
