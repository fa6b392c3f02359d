use super::keyed_lock::KeyedLocks;
use super::models::{LedgerSettings, OverpaymentPolicy, OverpaymentWarning, RecordedRepayment};
use crate::features::ledger::{
    compute_all_summaries, compute_contact_summary, compute_global_totals, compute_loan_details,
    matches_query, outstanding_summaries, overdue_loans, sort_contact_summaries, ContactSummary,
    GlobalTotals, LoanWithDetails, SortDirection, SortOption,
};
use crate::models::{
    Contact, ContactUpdate, Loan, LoanUpdate, NewContact, NewLoan, NewRepayment, Repayment,
};
use crate::shared::errors::{AppError, AppResult, ErrorSeverity};
use crate::shared::utils::nanoid::generate_id;
use crate::shared::utils::{
    normalize_optional, normalize_string, validate_amount, validate_attachment_uri,
    validate_contact_name, validate_date_order, validate_id, validate_notes, validate_text_length,
};
use crate::storage::{contact_order, loan_order, repayment_order, LedgerStorage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::RwLock as AsyncRwLock;

/// メールアドレスの最大文字数
const MAX_EMAIL_LENGTH: usize = 254;

/// 電話番号の最大文字数
const MAX_PHONE_LENGTH: usize = 32;

/// ストレージから読み込んだレコードの写し
#[derive(Debug, Default)]
struct Mirror {
    contacts: Vec<Contact>,
    loans: Vec<Loan>,
    repayments: Vec<Repayment>,
}

impl Mirror {
    fn loan(&self, id: &str) -> Option<&Loan> {
        self.loans.iter().find(|loan| loan.id == id)
    }

    fn has_contact(&self, id: &str) -> bool {
        self.contacts.iter().any(|contact| contact.id == id)
    }

    fn paid_for(&self, loan_id: &str) -> Decimal {
        self.repayments
            .iter()
            .filter(|repayment| repayment.loan_id == loan_id)
            .map(|repayment| repayment.amount)
            .sum()
    }

    fn remove_loan(&mut self, id: &str) {
        self.loans.retain(|loan| loan.id != id);
        self.repayments.retain(|repayment| repayment.loan_id != id);
    }
}

/// アプリケーション状態
///
/// 起動時にストレージの全レコードを読み込み、読み取りはすべてメモリ上の写しから
/// 同期的に返す。書き込みはストレージへの保存が成功した後にのみ写しへ反映するため、
/// 失敗した書き込みが読み取りに見えることはない。
///
/// 写しのロックは `await` をまたいで保持しない。同じエンティティへの書き込みは
/// IDごとのロックで1つずつ実行される。写し全体を置き換える `reload` と `clear_all` は
/// `gate` を排他で取得し、実行中の書き込みが終わるまで待つ。
pub struct LedgerState {
    storage: Arc<dyn LedgerStorage>,
    settings: LedgerSettings,
    mirror: RwLock<Mirror>,
    locks: KeyedLocks,
    /// 個別の書き込みは共有、写し全体の置き換えは排他で取得する
    gate: AsyncRwLock<()>,
}

impl LedgerState {
    /// ストレージから全レコードを読み込んで状態を作成する
    ///
    /// # 引数
    /// * `storage` - ストレージバックエンド
    /// * `settings` - 台帳の動作設定
    ///
    /// # 戻り値
    /// アプリケーション状態、または読み込み失敗時はエラー
    pub async fn load(
        storage: Arc<dyn LedgerStorage>,
        settings: LedgerSettings,
    ) -> AppResult<Self> {
        let state = Self {
            storage,
            settings,
            mirror: RwLock::new(Mirror::default()),
            locks: KeyedLocks::new(),
            gate: AsyncRwLock::new(()),
        };
        state.reload().await?;
        Ok(state)
    }

    /// ストレージから全レコードを読み込み直す
    ///
    /// 金額が不正なレコードがある場合は `Validation` エラーを返し、写しは変更しない。
    pub async fn reload(&self) -> AppResult<()> {
        let _gate = self.gate.write().await;

        let contacts = self
            .call_storage("連絡先一覧の取得", self.storage.list_contacts())
            .await?;
        let loans = self
            .call_storage("貸付一覧の取得", self.storage.list_loans(None))
            .await?;
        let repayments = self
            .call_storage("返済一覧の取得", self.storage.list_repayments(None))
            .await?;
        validate_stored_amounts(&loans, &repayments)?;

        log::info!(
            "台帳を読み込みました: backend={}, 連絡先={}件, 貸付={}件, 返済={}件",
            self.storage.backend_name(),
            contacts.len(),
            loans.len(),
            repayments.len()
        );

        *self.write_mirror() = Mirror {
            contacts,
            loans,
            repayments,
        };
        Ok(())
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    fn read_mirror(&self) -> RwLockReadGuard<'_, Mirror> {
        self.mirror.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_mirror(&self) -> RwLockWriteGuard<'_, Mirror> {
        self.mirror.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// ストレージ呼び出しにタイムアウトを適用し、失敗をログに記録する
    ///
    /// タイムアウト後にストレージ側の処理が完了した場合、写しは `reload` まで追従しない。
    async fn call_storage<T, F>(&self, operation: &str, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let result = match tokio::time::timeout(self.settings.storage_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(AppError::storage_unavailable(format!(
                "{operation}が{}ミリ秒以内に完了しませんでした",
                self.settings.storage_timeout.as_millis()
            ))),
        };

        if let Err(error) = &result {
            match error.severity() {
                ErrorSeverity::Low | ErrorSeverity::Medium => {
                    log::warn!("{operation}に失敗しました: {}", error.details());
                }
                ErrorSeverity::High | ErrorSeverity::Critical => {
                    log::error!(
                        "{operation}に失敗しました: backend={}, {}",
                        self.storage.backend_name(),
                        error.details()
                    );
                }
            }
        }
        result
    }

    // ---- 連絡先 ----

    /// 連絡先を追加する
    ///
    /// # 引数
    /// * `input` - 連絡先作成用DTO
    ///
    /// # 戻り値
    /// 作成された連絡先、または失敗時はエラー
    pub async fn add_contact(&self, input: NewContact) -> AppResult<Contact> {
        let input = normalize_new_contact(input);
        validate_new_contact(&input)?;

        let _gate = self.gate.read().await;
        self.insert_contact(input).await
    }

    /// 検証済みの入力から連絡先を作成する（呼び出し側で `gate` を保持すること）
    async fn insert_contact(&self, input: NewContact) -> AppResult<Contact> {
        let contact = Contact::from_new(input, generate_id(), Utc::now());
        self.call_storage("連絡先の作成", self.storage.create_contact(&contact))
            .await?;

        {
            let mut mirror = self.write_mirror();
            mirror.contacts.push(contact.clone());
            mirror.contacts.sort_by(contact_order);
        }

        log::info!("連絡先を作成しました: id={}", contact.id);
        Ok(contact)
    }

    /// 同じ名前（大文字小文字を区別しない）の連絡先があればそれを返し、なければ作成する
    pub async fn find_or_add_contact(&self, input: NewContact) -> AppResult<Contact> {
        let input = normalize_new_contact(input);
        validate_new_contact(&input)?;

        let name_key = input.name.to_lowercase();
        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&format!("contact-name:{name_key}")).await?;

        let existing = self
            .read_mirror()
            .contacts
            .iter()
            .find(|contact| contact.name.to_lowercase() == name_key)
            .cloned();

        match existing {
            Some(contact) => {
                log::debug!("既存の連絡先を使用します: id={}", contact.id);
                Ok(contact)
            }
            None => self.insert_contact(input).await,
        }
    }

    /// 連絡先を更新する（指定されたフィールドのみ）
    pub async fn update_contact(&self, id: &str, update: ContactUpdate) -> AppResult<Contact> {
        validate_id(id, "連絡先ID")?;

        let update = ContactUpdate {
            name: update.name.map(|name| normalize_string(&name)),
            phone_number: update.phone_number.map(normalize_optional),
            email: update.email.map(normalize_optional),
        };
        if let Some(name) = &update.name {
            validate_contact_name(name)?;
        }
        if let Some(Some(phone)) = &update.phone_number {
            validate_text_length(phone, MAX_PHONE_LENGTH, "電話番号")?;
        }
        if let Some(Some(email)) = &update.email {
            validate_text_length(email, MAX_EMAIL_LENGTH, "メールアドレス")?;
        }

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&contact_key(id)).await?;
        let updated = self
            .call_storage("連絡先の更新", self.storage.update_contact(id, &update))
            .await?;

        {
            let mut mirror = self.write_mirror();
            if let Some(slot) = mirror.contacts.iter_mut().find(|c| c.id == updated.id) {
                *slot = updated.clone();
            }
            mirror.contacts.sort_by(contact_order);
        }

        log::info!("連絡先を更新しました: id={id}");
        Ok(updated)
    }

    /// 連絡先と、その貸付・返済をまとめて削除する
    pub async fn delete_contact(&self, id: &str) -> AppResult<()> {
        validate_id(id, "連絡先ID")?;

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&contact_key(id)).await?;
        self.call_storage("連絡先の削除", self.storage.delete_contact(id))
            .await?;

        {
            let mut mirror = self.write_mirror();
            let loan_ids: Vec<String> = mirror
                .loans
                .iter()
                .filter(|loan| loan.contact_id == id)
                .map(|loan| loan.id.clone())
                .collect();
            for loan_id in &loan_ids {
                mirror.remove_loan(loan_id);
            }
            mirror.contacts.retain(|contact| contact.id != id);
        }

        log::info!("連絡先を削除しました: id={id}");
        Ok(())
    }

    // ---- 貸付 ----

    /// 貸付を追加する
    ///
    /// # 引数
    /// * `input` - 貸付作成用DTO
    ///
    /// # 戻り値
    /// 作成された貸付。連絡先が存在しない場合は `ForeignKeyViolation`
    pub async fn add_loan(&self, input: NewLoan) -> AppResult<Loan> {
        let input = NewLoan {
            notes: normalize_optional(input.notes),
            attachment_uri: normalize_optional(input.attachment_uri),
            ..input
        };
        validate_id(&input.contact_id, "連絡先ID")?;
        validate_amount(input.amount)?;
        validate_date_order(input.date_issued, input.due_date)?;
        validate_notes(input.notes.as_deref())?;
        validate_attachment_uri(input.attachment_uri.as_deref())?;

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&contact_key(&input.contact_id)).await?;

        let loan = Loan::from_new(input, generate_id(), Utc::now());
        self.call_storage("貸付の作成", self.storage.create_loan(&loan))
            .await?;

        {
            let mut mirror = self.write_mirror();
            if mirror.has_contact(&loan.contact_id) {
                mirror.loans.push(loan.clone());
                mirror.loans.sort_by(loan_order);
            }
        }

        log::info!(
            "貸付を作成しました: id={}, contact_id={}, amount={}",
            loan.id,
            loan.contact_id,
            loan.amount
        );
        Ok(loan)
    }

    /// 貸付を更新する（返済期日・メモ・添付ファイルのみ）
    pub async fn update_loan(&self, id: &str, update: LoanUpdate) -> AppResult<Loan> {
        validate_id(id, "貸付ID")?;

        let update = LoanUpdate {
            due_date: update.due_date,
            notes: update.notes.map(normalize_optional),
            attachment_uri: update.attachment_uri.map(normalize_optional),
        };
        if let Some(notes) = &update.notes {
            validate_notes(notes.as_deref())?;
        }
        if let Some(uri) = &update.attachment_uri {
            validate_attachment_uri(uri.as_deref())?;
        }

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&loan_key(id)).await?;

        if let Some(Some(due_date)) = update.due_date {
            let cached = self.read_mirror().loan(id).map(|loan| loan.date_issued);
            let date_issued = match cached {
                Some(date_issued) => date_issued,
                None => self
                    .call_storage("貸付の取得", self.storage.get_loan(id))
                    .await?
                    .map(|loan| loan.date_issued)
                    .ok_or_else(|| AppError::not_found("貸付", id))?,
            };
            validate_date_order(date_issued, Some(due_date))?;
        }

        let updated = self
            .call_storage("貸付の更新", self.storage.update_loan(id, &update))
            .await?;

        {
            let mut mirror = self.write_mirror();
            if let Some(slot) = mirror.loans.iter_mut().find(|loan| loan.id == updated.id) {
                *slot = updated.clone();
            } else if mirror.has_contact(&updated.contact_id) {
                mirror.loans.push(updated.clone());
                mirror.loans.sort_by(loan_order);
            }
        }

        log::info!("貸付を更新しました: id={id}");
        Ok(updated)
    }

    /// 貸付と、その返済をまとめて削除する
    pub async fn delete_loan(&self, id: &str) -> AppResult<()> {
        validate_id(id, "貸付ID")?;

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&loan_key(id)).await?;
        self.call_storage("貸付の削除", self.storage.delete_loan(id))
            .await?;

        self.write_mirror().remove_loan(id);

        log::info!("貸付を削除しました: id={id}");
        Ok(())
    }

    // ---- 返済 ----

    /// 返済を記録する
    ///
    /// 残高を超える返済は過払いポリシーに従って扱う。
    ///
    /// # 戻り値
    /// 記録された返済と、過払いの場合はその警告
    pub async fn add_repayment(&self, input: NewRepayment) -> AppResult<RecordedRepayment> {
        let input = NewRepayment {
            notes: normalize_optional(input.notes),
            attachment_uri: normalize_optional(input.attachment_uri),
            ..input
        };
        validate_id(&input.loan_id, "貸付ID")?;
        validate_amount(input.amount)?;
        validate_notes(input.notes.as_deref())?;
        validate_attachment_uri(input.attachment_uri.as_deref())?;

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&loan_key(&input.loan_id)).await?;

        let warning = self.check_overpayment(&input.loan_id, input.amount)?;

        let repayment = Repayment::from_new(input, generate_id(), Utc::now());
        self.call_storage("返済の作成", self.storage.create_repayment(&repayment))
            .await?;

        {
            let mut mirror = self.write_mirror();
            if mirror.loan(&repayment.loan_id).is_some() {
                mirror.repayments.push(repayment.clone());
                mirror.repayments.sort_by(repayment_order);
            }
        }

        if let Some(warning) = &warning {
            log::warn!(
                "残高を超える返済を記録しました: loan_id={}, 返済前残高={}, 超過額={}",
                warning.loan_id,
                warning.balance_before,
                warning.excess
            );
        }
        log::info!(
            "返済を記録しました: id={}, loan_id={}, amount={}",
            repayment.id,
            repayment.loan_id,
            repayment.amount
        );

        Ok(RecordedRepayment { repayment, warning })
    }

    /// 返済額が現在の残高を超えるかを判定する
    ///
    /// 写しに貸付がない場合は判定せず、ストレージの参照整合性チェックに任せる。
    fn check_overpayment(
        &self,
        loan_id: &str,
        amount: Decimal,
    ) -> AppResult<Option<OverpaymentWarning>> {
        let balance_before = {
            let mirror = self.read_mirror();
            match mirror.loan(loan_id) {
                Some(loan) => loan.amount - mirror.paid_for(loan_id),
                None => return Ok(None),
            }
        };

        if amount <= balance_before {
            return Ok(None);
        }

        let excess = amount - balance_before.max(Decimal::ZERO);
        match self.settings.overpayment_policy {
            OverpaymentPolicy::Reject => Err(AppError::Overpayment(format!(
                "返済額 {amount} が残高 {balance_before} を {excess} 超えています"
            ))),
            OverpaymentPolicy::AllowWithWarning => Ok(Some(OverpaymentWarning {
                loan_id: loan_id.to_string(),
                balance_before,
                excess,
            })),
        }
    }

    /// 返済を削除する（存在しない場合は何もしない）
    pub async fn delete_repayment(&self, id: &str) -> AppResult<()> {
        validate_id(id, "返済ID")?;

        let owner = self
            .read_mirror()
            .repayments
            .iter()
            .find(|repayment| repayment.id == id)
            .map(|repayment| repayment.loan_id.clone());
        let key = match &owner {
            Some(loan_id) => loan_key(loan_id),
            None => format!("repayment:{id}"),
        };

        let _gate = self.gate.read().await;
        let _guard = self.locks.lock(&key).await?;
        self.call_storage("返済の削除", self.storage.delete_repayment(id))
            .await?;

        self.write_mirror()
            .repayments
            .retain(|repayment| repayment.id != id);

        log::info!("返済を削除しました: id={id}");
        Ok(())
    }

    /// すべてのデータを削除する
    pub async fn clear_all(&self) -> AppResult<()> {
        let _gate = self.gate.write().await;
        self.call_storage("全データの削除", self.storage.clear_all())
            .await?;
        *self.write_mirror() = Mirror::default();
        log::warn!("すべての台帳データを削除しました");
        Ok(())
    }

    // ---- 読み取り ----

    /// 連絡先一覧（名前の昇順）
    pub fn contacts(&self) -> Vec<Contact> {
        self.read_mirror().contacts.clone()
    }

    pub fn get_contact(&self, id: &str) -> Option<Contact> {
        self.read_mirror()
            .contacts
            .iter()
            .find(|contact| contact.id == id)
            .cloned()
    }

    /// 貸付一覧（貸付日の降順）
    pub fn loans(&self) -> Vec<Loan> {
        self.read_mirror().loans.clone()
    }

    pub fn loans_for_contact(&self, contact_id: &str) -> Vec<Loan> {
        self.read_mirror()
            .loans
            .iter()
            .filter(|loan| loan.contact_id == contact_id)
            .cloned()
            .collect()
    }

    pub fn get_loan(&self, id: &str) -> Option<Loan> {
        self.read_mirror().loan(id).cloned()
    }

    /// 貸付の返済一覧（返済日の降順）
    pub fn repayments_for_loan(&self, loan_id: &str) -> Vec<Repayment> {
        self.read_mirror()
            .repayments
            .iter()
            .filter(|repayment| repayment.loan_id == loan_id)
            .cloned()
            .collect()
    }

    pub fn get_contact_summary(&self, contact_id: &str) -> Option<ContactSummary> {
        self.get_contact_summary_at(contact_id, Utc::now())
    }

    /// 指定時刻を基準に連絡先の集計を取得する
    pub fn get_contact_summary_at(
        &self,
        contact_id: &str,
        now: DateTime<Utc>,
    ) -> Option<ContactSummary> {
        let mirror = self.read_mirror();
        let contact = mirror.contacts.iter().find(|c| c.id == contact_id)?;
        Some(compute_contact_summary(
            contact,
            &mirror.loans,
            &mirror.repayments,
            now,
        ))
    }

    pub fn get_all_contact_summaries(&self) -> Vec<ContactSummary> {
        self.get_all_contact_summaries_at(Utc::now())
    }

    /// 全連絡先の集計（名前の昇順）
    pub fn get_all_contact_summaries_at(&self, now: DateTime<Utc>) -> Vec<ContactSummary> {
        let mirror = self.read_mirror();
        compute_all_summaries(&mirror.contacts, &mirror.loans, &mirror.repayments, now)
    }

    pub fn get_sorted_contact_summaries(
        &self,
        option: SortOption,
        direction: SortDirection,
    ) -> Vec<ContactSummary> {
        self.get_sorted_contact_summaries_at(option, direction, Utc::now())
    }

    pub fn get_sorted_contact_summaries_at(
        &self,
        option: SortOption,
        direction: SortDirection,
        now: DateTime<Utc>,
    ) -> Vec<ContactSummary> {
        let mut summaries = self.get_all_contact_summaries_at(now);
        sort_contact_summaries(&mut summaries, option, direction);
        summaries
    }

    pub fn get_outstanding_contact_summaries(&self) -> Vec<ContactSummary> {
        self.get_outstanding_contact_summaries_at(Utc::now())
    }

    /// 残高のある連絡先の集計（残高の降順）
    pub fn get_outstanding_contact_summaries_at(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<ContactSummary> {
        outstanding_summaries(self.get_all_contact_summaries_at(now))
    }

    pub fn search_contacts(&self, query: &str) -> Vec<ContactSummary> {
        self.search_contacts_at(query, Utc::now())
    }

    /// 名前または電話番号で連絡先を検索する
    pub fn search_contacts_at(&self, query: &str, now: DateTime<Utc>) -> Vec<ContactSummary> {
        self.get_all_contact_summaries_at(now)
            .into_iter()
            .filter(|summary| matches_query(&summary.contact, query))
            .collect()
    }

    pub fn get_loan_details(&self, loan_id: &str) -> Option<LoanWithDetails> {
        self.get_loan_details_at(loan_id, Utc::now())
    }

    /// 貸付の導出値を取得する
    pub fn get_loan_details_at(
        &self,
        loan_id: &str,
        now: DateTime<Utc>,
    ) -> Option<LoanWithDetails> {
        let mirror = self.read_mirror();
        let loan = mirror.loan(loan_id)?;
        Some(LoanWithDetails {
            loan: loan.clone(),
            details: compute_loan_details(loan, &mirror.repayments, now),
        })
    }

    /// 全体の集計
    pub fn get_global_totals(&self) -> GlobalTotals {
        let mirror = self.read_mirror();
        compute_global_totals(&mirror.loans, &mirror.repayments)
    }

    pub fn get_overdue_loans(&self) -> Vec<LoanWithDetails> {
        self.get_overdue_loans_at(Utc::now())
    }

    /// 期日を過ぎている貸付（期日の古い順）
    pub fn get_overdue_loans_at(&self, now: DateTime<Utc>) -> Vec<LoanWithDetails> {
        let mirror = self.read_mirror();
        overdue_loans(&mirror.loans, &mirror.repayments, now)
    }
}

fn contact_key(id: &str) -> String {
    format!("contact:{id}")
}

fn loan_key(id: &str) -> String {
    format!("loan:{id}")
}

/// 保存済みレコードの金額を検証する
///
/// 集計は範囲内の金額を前提とするため、範囲外の金額を含む台帳は読み込まない。
fn validate_stored_amounts(loans: &[Loan], repayments: &[Repayment]) -> AppResult<()> {
    for loan in loans {
        validate_amount(loan.amount).map_err(|e| {
            AppError::validation(format!(
                "保存済みの貸付 {} の金額が不正です: {}",
                loan.id,
                e.user_message()
            ))
        })?;
    }
    for repayment in repayments {
        validate_amount(repayment.amount).map_err(|e| {
            AppError::validation(format!(
                "保存済みの返済 {} の金額が不正です: {}",
                repayment.id,
                e.user_message()
            ))
        })?;
    }
    Ok(())
}

fn normalize_new_contact(input: NewContact) -> NewContact {
    NewContact {
        name: normalize_string(&input.name),
        phone_number: normalize_optional(input.phone_number),
        email: normalize_optional(input.email),
    }
}

fn validate_new_contact(input: &NewContact) -> AppResult<()> {
    validate_contact_name(&input.name)?;
    if let Some(phone) = &input.phone_number {
        validate_text_length(phone, MAX_PHONE_LENGTH, "電話番号")?;
    }
    if let Some(email) = &input.email {
        validate_text_length(email, MAX_EMAIL_LENGTH, "メールアドレス")?;
    }
    Ok(())
}
