/// 台帳集計機能モジュール
///
/// 連絡先・貸付・返済の生レコードから以下を導出します：
/// - 貸付ごとの返済合計、残高、状態、期日超過
/// - 連絡先ごとの残高合計
/// - 全体の貸付額・返済額・未回収額
/// - 連絡先の検索と並べ替え
pub mod calculator;
pub mod models;

pub use calculator::{
    compute_all_summaries, compute_contact_summary, compute_global_totals, compute_loan_details,
    filter_contacts, matches_query, outstanding_summaries, overdue_loans, sort_contact_summaries,
};
pub use models::{
    ContactSummary, GlobalTotals, LoanDetails, LoanStatus, LoanWithDetails, SortDirection,
    SortOption,
};
