use super::{contact_order, loan_order, repayment_order, LedgerStorage};
use crate::models::{Contact, ContactUpdate, Loan, LoanUpdate, Repayment};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// 台帳データ一式
///
/// JSONファイルストアの保存形式としても使用する。
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct LedgerTables {
    pub contacts: HashMap<String, Contact>,
    pub loans: HashMap<String, Loan>,
    pub repayments: HashMap<String, Repayment>,
}

impl LedgerTables {
    pub fn insert_contact(&mut self, contact: &Contact) -> AppResult<()> {
        if self.contacts.contains_key(&contact.id) {
            return Err(AppError::duplicate_key("連絡先", &contact.id));
        }
        self.contacts.insert(contact.id.clone(), contact.clone());
        Ok(())
    }

    pub fn sorted_contacts(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.contacts.values().cloned().collect();
        contacts.sort_by(contact_order);
        contacts
    }

    pub fn update_contact(&mut self, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
        let contact = self
            .contacts
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("連絡先", id))?;
        contact.apply_update(update);
        Ok(contact.clone())
    }

    /// 連絡先を削除し、貸付と返済へカスケードする
    ///
    /// # 戻り値
    /// 削除された貸付の件数
    pub fn remove_contact(&mut self, id: &str) -> usize {
        if self.contacts.remove(id).is_none() {
            return 0;
        }

        let loan_ids: Vec<String> = self
            .loans
            .values()
            .filter(|loan| loan.contact_id == id)
            .map(|loan| loan.id.clone())
            .collect();

        for loan_id in &loan_ids {
            self.remove_loan(loan_id);
        }
        loan_ids.len()
    }

    pub fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if self.loans.contains_key(&loan.id) {
            return Err(AppError::duplicate_key("貸付", &loan.id));
        }
        if !self.contacts.contains_key(&loan.contact_id) {
            return Err(AppError::foreign_key("連絡先", &loan.contact_id));
        }
        self.loans.insert(loan.id.clone(), loan.clone());
        Ok(())
    }

    pub fn sorted_loans(&self, contact_id: Option<&str>) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .values()
            .filter(|loan| contact_id.map_or(true, |id| loan.contact_id == id))
            .cloned()
            .collect();
        loans.sort_by(loan_order);
        loans
    }

    pub fn update_loan(&mut self, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
        let loan = self
            .loans
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("貸付", id))?;
        loan.apply_update(update, Utc::now());
        Ok(loan.clone())
    }

    /// 貸付を削除し、返済へカスケードする
    ///
    /// # 戻り値
    /// 削除された返済の件数
    pub fn remove_loan(&mut self, id: &str) -> usize {
        if self.loans.remove(id).is_none() {
            return 0;
        }
        let before = self.repayments.len();
        self.repayments.retain(|_, repayment| repayment.loan_id != id);
        before - self.repayments.len()
    }

    pub fn insert_repayment(&mut self, repayment: &Repayment) -> AppResult<()> {
        if self.repayments.contains_key(&repayment.id) {
            return Err(AppError::duplicate_key("返済", &repayment.id));
        }
        if !self.loans.contains_key(&repayment.loan_id) {
            return Err(AppError::foreign_key("貸付", &repayment.loan_id));
        }
        self.repayments
            .insert(repayment.id.clone(), repayment.clone());
        Ok(())
    }

    pub fn sorted_repayments(&self, loan_id: Option<&str>) -> Vec<Repayment> {
        let mut repayments: Vec<Repayment> = self
            .repayments
            .values()
            .filter(|repayment| loan_id.map_or(true, |id| repayment.loan_id == id))
            .cloned()
            .collect();
        repayments.sort_by(repayment_order);
        repayments
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.loans.clear();
        self.repayments.clear();
    }
}

/// メモリ上のマップによるストレージ
///
/// 開発・テスト用。すべての操作は1つのロックの中で完結するため、
/// カスケード削除も含めてアトミックに適用される。
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: Mutex<LedgerTables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, LedgerTables>> {
        self.tables
            .lock()
            .map_err(|e| AppError::storage_unavailable(format!("メモリストアのロックエラー: {e}")))
    }
}

#[async_trait]
impl LedgerStorage for InMemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_contact(&self, contact: &Contact) -> AppResult<()> {
        self.lock()?.insert_contact(contact)
    }

    async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        Ok(self.lock()?.sorted_contacts())
    }

    async fn get_contact(&self, id: &str) -> AppResult<Option<Contact>> {
        Ok(self.lock()?.contacts.get(id).cloned())
    }

    async fn update_contact(&self, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
        self.lock()?.update_contact(id, update)
    }

    async fn delete_contact(&self, id: &str) -> AppResult<()> {
        let removed_loans = self.lock()?.remove_contact(id);
        log::debug!("連絡先を削除しました: id={id}, 削除された貸付={removed_loans}件");
        Ok(())
    }

    async fn create_loan(&self, loan: &Loan) -> AppResult<()> {
        self.lock()?.insert_loan(loan)
    }

    async fn list_loans(&self, contact_id: Option<&str>) -> AppResult<Vec<Loan>> {
        Ok(self.lock()?.sorted_loans(contact_id))
    }

    async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>> {
        Ok(self.lock()?.loans.get(id).cloned())
    }

    async fn update_loan(&self, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
        self.lock()?.update_loan(id, update)
    }

    async fn delete_loan(&self, id: &str) -> AppResult<()> {
        let removed_repayments = self.lock()?.remove_loan(id);
        log::debug!("貸付を削除しました: id={id}, 削除された返済={removed_repayments}件");
        Ok(())
    }

    async fn create_repayment(&self, repayment: &Repayment) -> AppResult<()> {
        self.lock()?.insert_repayment(repayment)
    }

    async fn list_repayments(&self, loan_id: Option<&str>) -> AppResult<Vec<Repayment>> {
        Ok(self.lock()?.sorted_repayments(loan_id))
    }

    async fn delete_repayment(&self, id: &str) -> AppResult<()> {
        self.lock()?.repayments.remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.lock()?.clear();
        Ok(())
    }
}
