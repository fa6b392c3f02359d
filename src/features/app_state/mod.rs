/// アプリケーション状態機能モジュール
///
/// このモジュールは台帳のファサードを提供します：
/// - 起動時の全レコード読み込みとメモリ上の写しの管理
/// - 連絡先・貸付・返済の作成、更新、削除（ストレージ経由）
/// - 集計ビュー（連絡先ごとの残高、全体の集計、期日超過、検索）
/// - 過払いポリシーとストレージ呼び出しのタイムアウト
pub mod keyed_lock;
pub mod models;
pub mod state;

#[cfg(test)]
mod integration_tests;

pub use models::{LedgerSettings, OverpaymentPolicy, OverpaymentWarning, RecordedRepayment};
pub use state::LedgerState;
