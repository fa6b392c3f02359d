//! アプリケーション状態の統合テスト
//!
//! すべてのストレージバックエンドに対して同じシナリオを実行する。

use super::*;
use crate::features::ledger::{LoanStatus, SortDirection, SortOption};
use crate::models::{
    Contact, ContactUpdate, Loan, LoanUpdate, NewContact, NewLoan, NewRepayment, Repayment,
};
use crate::shared::errors::{AppError, AppResult};
use crate::storage::contract_tests::{self, day};
use crate::storage::{InMemoryStorage, JsonFileStorage, LedgerStorage, SqliteStorage};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// テスト対象のバックエンド（ファイルを使うものは一時ディレクトリを保持する）
fn backends() -> Vec<(Arc<dyn LedgerStorage>, TempDir)> {
    let memory_dir = TempDir::new().unwrap();
    let json_dir = TempDir::new().unwrap();
    let sqlite_dir = TempDir::new().unwrap();

    let json = JsonFileStorage::open(json_dir.path().join("ledger.json")).unwrap();
    let sqlite = SqliteStorage::open(sqlite_dir.path().join("ledger.db")).unwrap();

    vec![
        (Arc::new(InMemoryStorage::new()) as Arc<dyn LedgerStorage>, memory_dir),
        (Arc::new(json) as Arc<dyn LedgerStorage>, json_dir),
        (Arc::new(sqlite) as Arc<dyn LedgerStorage>, sqlite_dir),
    ]
}

async fn load(storage: Arc<dyn LedgerStorage>, policy: OverpaymentPolicy) -> LedgerState {
    let settings = LedgerSettings {
        overpayment_policy: policy,
        ..LedgerSettings::default()
    };
    LedgerState::load(storage, settings).await.unwrap()
}

fn new_contact(name: &str) -> NewContact {
    NewContact {
        name: name.to_string(),
        ..Default::default()
    }
}

fn new_loan(contact_id: &str, amount: i64, issued_day: i64, due_day: Option<i64>) -> NewLoan {
    NewLoan {
        contact_id: contact_id.to_string(),
        amount: Decimal::from(amount),
        date_issued: day(issued_day),
        due_date: due_day.map(day),
        notes: None,
        attachment_uri: None,
    }
}

fn new_repayment(loan_id: &str, amount: i64, paid_day: i64) -> NewRepayment {
    NewRepayment {
        loan_id: loan_id.to_string(),
        amount: Decimal::from(amount),
        repayment_date: day(paid_day),
        notes: None,
        attachment_uri: None,
    }
}

#[tokio::test]
async fn test_aisha_loan_lifecycle() {
    for (storage, _dir) in backends() {
        let backend = storage.backend_name();
        let state = load(storage, OverpaymentPolicy::AllowWithWarning).await;

        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();

        let first = state
            .add_repayment(new_repayment(&loan.id, 400, 10))
            .await
            .unwrap();
        assert!(first.warning.is_none(), "{backend}");

        // 期日前の一部返済
        let details = state.get_loan_details_at(&loan.id, day(15)).unwrap().details;
        assert_eq!(details.total_paid, Decimal::from(400), "{backend}");
        assert_eq!(details.balance_due, Decimal::from(600), "{backend}");
        assert_eq!(details.status, LoanStatus::Partial, "{backend}");
        assert!(!details.overdue, "{backend}");

        // 期日超過
        let details = state.get_loan_details_at(&loan.id, day(31)).unwrap().details;
        assert!(details.overdue, "{backend}");
        assert_eq!(details.balance_due, Decimal::from(600), "{backend}");
        assert_eq!(state.get_overdue_loans_at(day(31)).len(), 1, "{backend}");

        // 完済
        state
            .add_repayment(new_repayment(&loan.id, 600, 40))
            .await
            .unwrap();
        let details = state.get_loan_details_at(&loan.id, day(45)).unwrap().details;
        assert_eq!(details.total_paid, Decimal::from(1000), "{backend}");
        assert_eq!(details.balance_due, Decimal::ZERO, "{backend}");
        assert_eq!(details.status, LoanStatus::Repaid, "{backend}");
        assert!(!details.overdue, "{backend}");
        assert!(state.get_overdue_loans_at(day(45)).is_empty(), "{backend}");

        // 過払いは警告付きで記録される
        let extra = state
            .add_repayment(new_repayment(&loan.id, 100, 50))
            .await
            .unwrap();
        let warning = extra.warning.expect("過払いの警告がありません");
        assert_eq!(warning.loan_id, loan.id, "{backend}");
        assert_eq!(warning.balance_before, Decimal::ZERO, "{backend}");
        assert_eq!(warning.excess, Decimal::from(100), "{backend}");

        let summary = state.get_contact_summary_at(&aisha.id, day(50)).unwrap();
        assert_eq!(summary.total_due, Decimal::from(-100), "{backend}");

        let totals = state.get_global_totals();
        assert_eq!(totals.total_loaned, Decimal::from(1000), "{backend}");
        assert_eq!(totals.total_repaid, Decimal::from(1100), "{backend}");
        assert_eq!(totals.total_outstanding, Decimal::from(-100), "{backend}");
        assert_eq!(totals.loans_count, 1, "{backend}");
        assert!(state
            .get_outstanding_contact_summaries_at(day(50))
            .is_empty());
    }
}

#[tokio::test]
async fn test_reject_policy_blocks_overpayment() {
    for (storage, _dir) in backends() {
        let state = load(Arc::clone(&storage), OverpaymentPolicy::Reject).await;

        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&loan.id, 400, 10))
            .await
            .unwrap();

        let result = state.add_repayment(new_repayment(&loan.id, 601, 12)).await;
        assert!(matches!(result, Err(AppError::Overpayment(_))));

        // ちょうど残高分は受け付ける
        let exact = state
            .add_repayment(new_repayment(&loan.id, 600, 12))
            .await
            .unwrap();
        assert!(exact.warning.is_none());

        assert_eq!(state.repayments_for_loan(&loan.id).len(), 2);
        assert_eq!(storage.list_repayments(Some(&loan.id)).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_foreign_key_failure_leaves_mirror_unchanged() {
    for (storage, _dir) in backends() {
        let state = load(Arc::clone(&storage), OverpaymentPolicy::default()).await;

        let result = state.add_loan(new_loan("ghost-contact", 500, 0, None)).await;
        assert!(matches!(result, Err(AppError::ForeignKeyViolation(_))));
        assert!(state.loans().is_empty());
        assert_eq!(state.get_global_totals().loans_count, 0);

        let result = state.add_repayment(new_repayment("ghost-loan", 50, 0)).await;
        assert!(matches!(result, Err(AppError::ForeignKeyViolation(_))));
        assert!(state.repayments_for_loan("ghost-loan").is_empty());

        assert!(storage.list_loans(None).await.unwrap().is_empty());
        assert!(storage.list_repayments(None).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_validation_errors_never_reach_storage() {
    let storage: Arc<dyn LedgerStorage> = Arc::new(InMemoryStorage::new());
    let state = load(Arc::clone(&storage), OverpaymentPolicy::default()).await;
    let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();

    let cases: Vec<AppResult<Loan>> = vec![
        state.add_loan(new_loan(&aisha.id, 0, 0, None)).await,
        state.add_loan(new_loan(&aisha.id, -5, 0, None)).await,
        state.add_loan(new_loan(&aisha.id, 100, 10, Some(5))).await,
        state.add_loan(new_loan("not a valid id!", 100, 0, None)).await,
        state
            .add_loan(NewLoan {
                amount: Decimal::new(1001, 3),
                ..new_loan(&aisha.id, 0, 0, None)
            })
            .await,
    ];
    for result in cases {
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    let result = state.add_contact(new_contact("   ")).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    assert!(storage.list_loans(None).await.unwrap().is_empty());
    assert_eq!(storage.list_contacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_contact_cascades_everywhere() {
    for (storage, _dir) in backends() {
        let state = load(Arc::clone(&storage), OverpaymentPolicy::default()).await;

        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let hassan = state.add_contact(new_contact("Hassan")).await.unwrap();
        let rent = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();
        let phone = state
            .add_loan(new_loan(&hassan.id, 300, 2, None))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&rent.id, 100, 3))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&phone.id, 50, 4))
            .await
            .unwrap();

        state.delete_contact(&aisha.id).await.unwrap();

        assert!(state.get_contact(&aisha.id).is_none());
        assert!(state.get_loan(&rent.id).is_none());
        assert!(state.repayments_for_loan(&rent.id).is_empty());
        assert_eq!(state.loans().len(), 1);
        assert_eq!(state.repayments_for_loan(&phone.id).len(), 1);

        // 読み込み直しても同じ結果になる
        state.reload().await.unwrap();
        assert_eq!(state.contacts().len(), 1);
        assert_eq!(state.get_global_totals().total_outstanding, Decimal::from(250));
        assert!(storage
            .list_repayments(Some(&rent.id))
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_delete_loan_and_repayment() {
    for (storage, _dir) in backends() {
        let state = load(storage, OverpaymentPolicy::default()).await;
        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();
        let first = state
            .add_repayment(new_repayment(&loan.id, 400, 10))
            .await
            .unwrap()
            .repayment;
        state
            .add_repayment(new_repayment(&loan.id, 100, 12))
            .await
            .unwrap();

        state.delete_repayment(&first.id).await.unwrap();
        let details = state.get_loan_details_at(&loan.id, day(13)).unwrap().details;
        assert_eq!(details.total_paid, Decimal::from(100));

        // 存在しない返済の削除は成功扱い
        state.delete_repayment(&first.id).await.unwrap();

        state.delete_loan(&loan.id).await.unwrap();
        assert!(state.get_loan_details_at(&loan.id, day(13)).is_none());
        assert!(state.repayments_for_loan(&loan.id).is_empty());
        assert_eq!(
            state.get_contact_summary_at(&aisha.id, day(13)).unwrap().total_due,
            Decimal::ZERO
        );
    }
}

#[tokio::test]
async fn test_update_loan_and_contact() {
    for (storage, _dir) in backends() {
        let state = load(storage, OverpaymentPolicy::default()).await;
        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 5, Some(30)))
            .await
            .unwrap();

        let updated = state
            .update_loan(
                &loan.id,
                LoanUpdate {
                    notes: Some(Some("  家賃の立て替え  ".to_string())),
                    due_date: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("家賃の立て替え"));
        assert_eq!(updated.due_date, None);
        assert!(updated.updated_at >= loan.updated_at);
        assert_eq!(state.get_loan(&loan.id).unwrap().due_date, None);

        // 返済期日は貸付日より前にできない
        let result = state
            .update_loan(
                &loan.id,
                LoanUpdate {
                    due_date: Some(Some(day(1))),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = state
            .update_loan("missing-loan", LoanUpdate::default())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let renamed = state
            .update_contact(
                &aisha.id,
                ContactUpdate {
                    name: Some("Aisha Ibrahim".to_string()),
                    email: Some(Some("aisha@example.com".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Aisha Ibrahim");
        assert_eq!(
            state.get_contact(&aisha.id).unwrap().email.as_deref(),
            Some("aisha@example.com")
        );
    }
}

#[tokio::test]
async fn test_find_or_add_contact_matches_case_insensitively() {
    let state = load(Arc::new(InMemoryStorage::new()), OverpaymentPolicy::default()).await;

    let first = state.find_or_add_contact(new_contact("Aisha")).await.unwrap();
    let second = state
        .find_or_add_contact(new_contact("  aisha "))
        .await
        .unwrap();
    let other = state
        .find_or_add_contact(new_contact("Hassan"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.id, other.id);
    assert_eq!(state.contacts().len(), 2);
}

#[tokio::test]
async fn test_search_and_sorted_views() {
    let state = load(Arc::new(InMemoryStorage::new()), OverpaymentPolicy::default()).await;

    let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
    let hassan = state
        .add_contact(NewContact {
            name: "Hassan".to_string(),
            phone_number: Some("+960 777 1234".to_string()),
            email: None,
        })
        .await
        .unwrap();
    let zainab = state.add_contact(new_contact("Zainab")).await.unwrap();

    state
        .add_loan(new_loan(&aisha.id, 200, 0, Some(20)))
        .await
        .unwrap();
    state
        .add_loan(new_loan(&hassan.id, 900, 0, Some(40)))
        .await
        .unwrap();
    let settled = state
        .add_loan(new_loan(&zainab.id, 50, 0, Some(10)))
        .await
        .unwrap();
    state
        .add_repayment(new_repayment(&settled.id, 50, 1))
        .await
        .unwrap();

    let names = |summaries: Vec<crate::features::ledger::ContactSummary>| -> Vec<String> {
        summaries.into_iter().map(|s| s.contact.name).collect()
    };

    assert_eq!(names(state.search_contacts_at("777", day(2))), vec!["Hassan"]);
    assert_eq!(names(state.search_contacts_at("AI", day(2))), vec!["Aisha", "Zainab"]);
    assert_eq!(
        names(state.get_outstanding_contact_summaries_at(day(2))),
        vec!["Hassan", "Aisha"]
    );
    assert_eq!(
        names(state.get_sorted_contact_summaries_at(
            SortOption::DueDate,
            SortDirection::Asc,
            day(2)
        )),
        vec!["Aisha", "Hassan", "Zainab"]
    );
    assert_eq!(
        names(state.get_all_contact_summaries_at(day(2))),
        vec!["Aisha", "Hassan", "Zainab"]
    );
}

#[tokio::test]
async fn test_state_survives_reload_from_storage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.db");

    let loan_id = {
        let storage = Arc::new(SqliteStorage::open(&path).unwrap());
        let state = load(storage, OverpaymentPolicy::default()).await;
        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&loan.id, 400, 10))
            .await
            .unwrap();
        loan.id
    };

    let storage = Arc::new(SqliteStorage::open(&path).unwrap());
    let state = load(storage, OverpaymentPolicy::default()).await;
    let details = state.get_loan_details_at(&loan_id, day(15)).unwrap().details;
    assert_eq!(details.balance_due, Decimal::from(600));
    assert_eq!(details.status, LoanStatus::Partial);
}

#[tokio::test]
async fn test_concurrent_repayments_on_one_loan_are_serialized() {
    let state = load(Arc::new(InMemoryStorage::new()), OverpaymentPolicy::Reject).await;
    let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
    let loan = state
        .add_loan(new_loan(&aisha.id, 1000, 0, None))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        state.add_repayment(new_repayment(&loan.id, 600, 1)),
        state.add_repayment(new_repayment(&loan.id, 600, 2)),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    assert_eq!(state.repayments_for_loan(&loan.id).len(), 1);
}

/// 応答が遅いストレージ
#[derive(Default)]
struct SlowStorage {
    inner: InMemoryStorage,
    /// 連絡先の作成前に待つ時間
    create_delay: Duration,
    /// 返済一覧の取得後と全削除後に待つ時間（ミリ秒、0なら待たない）
    snapshot_delay_ms: AtomicU64,
}

impl SlowStorage {
    fn delay_snapshots(&self, millis: u64) {
        self.snapshot_delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn pause_after_snapshot(&self) {
        let millis = self.snapshot_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl LedgerStorage for SlowStorage {
    fn backend_name(&self) -> &'static str {
        "slow"
    }

    async fn create_contact(&self, contact: &Contact) -> AppResult<()> {
        tokio::time::sleep(self.create_delay).await;
        self.inner.create_contact(contact).await
    }

    async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        self.inner.list_contacts().await
    }

    async fn get_contact(&self, id: &str) -> AppResult<Option<Contact>> {
        self.inner.get_contact(id).await
    }

    async fn update_contact(&self, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
        self.inner.update_contact(id, update).await
    }

    async fn delete_contact(&self, id: &str) -> AppResult<()> {
        self.inner.delete_contact(id).await
    }

    async fn create_loan(&self, loan: &Loan) -> AppResult<()> {
        self.inner.create_loan(loan).await
    }

    async fn list_loans(&self, contact_id: Option<&str>) -> AppResult<Vec<Loan>> {
        self.inner.list_loans(contact_id).await
    }

    async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>> {
        self.inner.get_loan(id).await
    }

    async fn update_loan(&self, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
        self.inner.update_loan(id, update).await
    }

    async fn delete_loan(&self, id: &str) -> AppResult<()> {
        self.inner.delete_loan(id).await
    }

    async fn create_repayment(&self, repayment: &Repayment) -> AppResult<()> {
        self.inner.create_repayment(repayment).await
    }

    async fn list_repayments(&self, loan_id: Option<&str>) -> AppResult<Vec<Repayment>> {
        let snapshot = self.inner.list_repayments(loan_id).await;
        self.pause_after_snapshot().await;
        snapshot
    }

    async fn delete_repayment(&self, id: &str) -> AppResult<()> {
        self.inner.delete_repayment(id).await
    }

    async fn clear_all(&self) -> AppResult<()> {
        let result = self.inner.clear_all().await;
        self.pause_after_snapshot().await;
        result
    }
}

#[tokio::test]
async fn test_storage_timeout_is_storage_unavailable() {
    let storage = Arc::new(SlowStorage {
        create_delay: Duration::from_secs(2),
        ..SlowStorage::default()
    });
    let settings = LedgerSettings {
        storage_timeout: Duration::from_millis(50),
        ..LedgerSettings::default()
    };
    let state = LedgerState::load(storage, settings).await.unwrap();

    let result = state.add_contact(new_contact("Aisha")).await;
    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    assert!(state.contacts().is_empty());
}

#[tokio::test]
async fn test_clear_all_empties_state_and_storage() {
    for (storage, _dir) in backends() {
        let state = load(Arc::clone(&storage), OverpaymentPolicy::default()).await;
        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        state
            .add_loan(new_loan(&aisha.id, 100, 0, None))
            .await
            .unwrap();

        state.clear_all().await.unwrap();

        assert!(state.contacts().is_empty());
        assert_eq!(state.get_global_totals().loans_count, 0);
        assert!(storage.list_contacts().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_reload_does_not_drop_concurrent_repayment() {
    let storage = Arc::new(SlowStorage::default());
    let state = LedgerState::load(storage.clone(), LedgerSettings::default())
        .await
        .unwrap();
    let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
    let loan = state
        .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
        .await
        .unwrap();

    // 読み込みが返済一覧を取得した後に返済が記録される
    storage.delay_snapshots(100);
    let (reloaded, recorded) = tokio::join!(state.reload(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.add_repayment(new_repayment(&loan.id, 400, 10)).await
    });
    reloaded.unwrap();
    recorded.unwrap();
    storage.delay_snapshots(0);

    let stored = storage.list_repayments(Some(&loan.id)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(state.repayments_for_loan(&loan.id).len(), stored.len());

    let details = state.get_loan_details_at(&loan.id, day(15)).unwrap().details;
    assert_eq!(details.balance_due, Decimal::from(600));
}

#[tokio::test]
async fn test_clear_all_does_not_drop_concurrent_contact() {
    let storage = Arc::new(SlowStorage::default());
    let state = LedgerState::load(storage.clone(), LedgerSettings::default())
        .await
        .unwrap();
    state.add_contact(new_contact("Hassan")).await.unwrap();

    storage.delay_snapshots(100);
    let (cleared, added) = tokio::join!(state.clear_all(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.add_contact(new_contact("Aisha")).await
    });
    cleared.unwrap();
    let aisha = added.unwrap();
    storage.delay_snapshots(0);

    let stored = storage.list_contacts().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, aisha.id);
    let names: Vec<String> = state.contacts().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["Aisha".to_string()]);
}

#[tokio::test]
async fn test_update_loan_checks_due_date_for_loan_missing_from_state() {
    let storage = Arc::new(InMemoryStorage::new());
    let state = load(storage.clone(), OverpaymentPolicy::default()).await;

    // 読み込み後に別経路で保存された貸付
    storage
        .create_contact(&contract_tests::contact("c-1", "Aisha"))
        .await
        .unwrap();
    storage
        .create_loan(&contract_tests::loan("l-1", "c-1", 500, 10))
        .await
        .unwrap();

    let early = LoanUpdate {
        due_date: Some(Some(day(5))),
        ..LoanUpdate::default()
    };
    let result = state.update_loan("l-1", early).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(
        storage.get_loan("l-1").await.unwrap().unwrap().due_date,
        Some(day(40))
    );

    let missing = state
        .update_loan(
            "l-missing",
            LoanUpdate {
                due_date: Some(Some(day(5))),
                ..LoanUpdate::default()
            },
        )
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let later = LoanUpdate {
        due_date: Some(Some(day(20))),
        ..LoanUpdate::default()
    };
    let updated = state.update_loan("l-1", later).await.unwrap();
    assert_eq!(updated.due_date, Some(day(20)));
}

#[tokio::test]
async fn test_load_rejects_out_of_range_amount() {
    let storage = Arc::new(InMemoryStorage::new());
    storage
        .create_contact(&contract_tests::contact("c-1", "Aisha"))
        .await
        .unwrap();
    let mut corrupted = contract_tests::loan("l-1", "c-1", 0, 0);
    corrupted.amount = Decimal::MAX;
    storage.create_loan(&corrupted).await.unwrap();

    let result = LedgerState::load(storage, LedgerSettings::default()).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_reload_keeps_state_when_stored_amount_is_invalid() {
    let storage = Arc::new(InMemoryStorage::new());
    let state = load(storage.clone(), OverpaymentPolicy::default()).await;
    let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
    let loan = state
        .add_loan(new_loan(&aisha.id, 1000, 0, None))
        .await
        .unwrap();

    let mut bad = contract_tests::repayment("r-bad", &loan.id, 0, 3);
    bad.amount = Decimal::new(-5, 0);
    storage.create_repayment(&bad).await.unwrap();

    assert!(matches!(state.reload().await, Err(AppError::Validation(_))));
    assert!(state.repayments_for_loan(&loan.id).is_empty());
    assert_eq!(state.loans().len(), 1);
}

#[tokio::test]
async fn test_locked_sqlite_write_respects_storage_timeout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.db");
    let storage = SqliteStorage::open(&path).unwrap();
    storage.set_busy_timeout(Duration::from_millis(500)).unwrap();
    let settings = LedgerSettings {
        storage_timeout: Duration::from_millis(50),
        ..LedgerSettings::default()
    };
    let state = LedgerState::load(Arc::new(storage), settings).await.unwrap();

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let started = Instant::now();
    let result = state.add_contact(new_contact("Aisha")).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    assert!(state.contacts().is_empty());

    blocker.execute_batch("ROLLBACK;").unwrap();
}

#[tokio::test]
async fn test_overpayment_on_fully_repaid_loan() {
    for (storage, _dir) in backends() {
        let backend = storage.backend_name();
        let state = load(storage, OverpaymentPolicy::AllowWithWarning).await;
        let aisha = state.add_contact(new_contact("Aisha")).await.unwrap();
        let loan = state
            .add_loan(new_loan(&aisha.id, 1000, 0, Some(30)))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&loan.id, 400, 10))
            .await
            .unwrap();
        state
            .add_repayment(new_repayment(&loan.id, 600, 40))
            .await
            .unwrap();

        let recorded = state
            .add_repayment(new_repayment(&loan.id, 700, 50))
            .await
            .unwrap();
        let warning = recorded.warning.expect("過払いの警告がありません");
        assert_eq!(warning.balance_before, Decimal::ZERO, "{backend}");
        assert_eq!(warning.excess, Decimal::from(700), "{backend}");

        let details = state.get_loan_details_at(&loan.id, day(60)).unwrap().details;
        assert_eq!(details.total_paid, Decimal::from(1700), "{backend}");
        assert_eq!(details.balance_due, Decimal::from(-700), "{backend}");
        assert_eq!(details.status, LoanStatus::Repaid, "{backend}");
        assert!(!details.overdue, "{backend}");

        let totals = state.get_global_totals();
        assert_eq!(totals.total_outstanding, Decimal::from(-700), "{backend}");
        assert_eq!(
            totals.total_outstanding,
            totals.total_loaned - totals.total_repaid,
            "{backend}"
        );
    }
}
