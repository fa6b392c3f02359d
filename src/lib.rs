//! 個人間の貸し借りを記録する台帳のコア
//!
//! 連絡先ごとの貸付と返済を記録し、残高・状態・期日超過を導出します。
//! 永続化は [`storage::LedgerStorage`] の実装（メモリ・JSONファイル・SQLite）で差し替えできます。

pub mod features;
pub mod models;
pub mod shared;
pub mod storage;

pub use features::app_state::{
    LedgerSettings, LedgerState, OverpaymentPolicy, OverpaymentWarning, RecordedRepayment,
};
pub use features::ledger::{
    ContactSummary, GlobalTotals, LoanDetails, LoanStatus, LoanWithDetails, SortDirection,
    SortOption,
};
pub use models::{Contact, ContactUpdate, Loan, LoanUpdate, NewContact, NewLoan, NewRepayment, Repayment};
pub use shared::config::{initialize_application, EnvironmentConfig, InitializationResult};
pub use shared::errors::{AppError, AppResult, ErrorSeverity};
pub use storage::{
    open_storage, InMemoryStorage, JsonFileStorage, LedgerStorage, SqliteStorage, StorageBackend,
};
