/// 機能別モジュール
///
/// 各機能モジュールは、その機能に関連するモデルと処理を含む自己完結型のユニットです。
pub mod app_state;
pub mod ledger;
