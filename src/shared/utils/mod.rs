/// ID生成
pub mod nanoid;

use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// 金額の上限（10桁以内）
const MAX_AMOUNT: i64 = 10_000_000_000;

/// 金額の小数点以下の最大桁数
const MAX_AMOUNT_SCALE: u32 = 2;

/// 金額のバリデーション
///
/// # 引数
/// * `amount` - 金額
///
/// # 戻り値
/// 有効な金額の場合はOk(())、無効な場合はエラー
///
/// # バリデーション規則
/// - 正の数値であること
/// - 10桁以内であること（9,999,999,999.99まで）
/// - 小数点以下は2桁まで
pub fn validate_amount(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::validation("金額は正の数値で入力してください"));
    }

    if amount >= Decimal::from(MAX_AMOUNT) {
        return Err(AppError::validation("金額は10桁以内で入力してください"));
    }

    // 末尾の0は桁数に数えない（1000.50 は2桁）
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(AppError::validation(
            "金額は小数点以下2桁まで入力してください",
        ));
    }

    Ok(())
}

/// 文字列の長さバリデーション
///
/// # 引数
/// * `text` - 検証対象の文字列
/// * `max_length` - 最大文字数
/// * `field_name` - フィールド名（エラーメッセージ用）
///
/// # 戻り値
/// 有効な長さの場合はOk(())、無効な場合はエラー
pub fn validate_text_length(text: &str, max_length: usize, field_name: &str) -> AppResult<()> {
    let char_count = text.chars().count();
    if char_count > max_length {
        return Err(AppError::validation(format!(
            "{field_name}は{max_length}文字以内で入力してください（現在: {char_count}文字）"
        )));
    }
    Ok(())
}

/// 必須フィールドのバリデーション
///
/// # 引数
/// * `text` - 検証対象の文字列
/// * `field_name` - フィールド名（エラーメッセージ用）
///
/// # 戻り値
/// 空でない場合はOk(())、空の場合はエラー
pub fn validate_required_field(text: &str, field_name: &str) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::validation(format!("{field_name}は必須項目です")));
    }
    Ok(())
}

/// 連絡先名のバリデーション
///
/// # バリデーション規則
/// - 必須項目であること
/// - 100文字以内であること
pub fn validate_contact_name(name: &str) -> AppResult<()> {
    validate_required_field(name, "名前")?;
    validate_text_length(name, 100, "名前")?;
    Ok(())
}

/// メモのバリデーション（500文字以内、Noneの場合は有効）
pub fn validate_notes(notes: Option<&str>) -> AppResult<()> {
    if let Some(notes) = notes {
        validate_text_length(notes, 500, "メモ")?;
    }
    Ok(())
}

/// 添付ファイルURIのバリデーション
///
/// URIは外部に保存されたファイルへの不透明な参照なので、形式は問わない。
pub fn validate_attachment_uri(uri: Option<&str>) -> AppResult<()> {
    if let Some(uri) = uri {
        validate_required_field(uri, "添付ファイル")?;
        validate_text_length(uri, 2048, "添付ファイル")?;
    }
    Ok(())
}

/// 返済期日が貸付日以降であることを検証する
///
/// # 引数
/// * `date_issued` - 貸付日
/// * `due_date` - 返済期日（オプション）
pub fn validate_date_order(
    date_issued: DateTime<Utc>,
    due_date: Option<DateTime<Utc>>,
) -> AppResult<()> {
    match due_date {
        Some(due) if due < date_issued => Err(AppError::validation(
            "返済期日は貸付日より前に設定できません",
        )),
        _ => Ok(()),
    }
}

/// 識別子のバリデーション
///
/// # 引数
/// * `id` - 検証対象のID
/// * `field_name` - フィールド名（エラーメッセージ用）
pub fn validate_id(id: &str, field_name: &str) -> AppResult<()> {
    if !self::nanoid::is_valid_id(id) {
        return Err(AppError::validation(format!(
            "{field_name}の形式が正しくありません"
        )));
    }
    Ok(())
}

/// 文字列の正規化（前後の空白を削除）
pub fn normalize_string(text: &str) -> String {
    text.trim().to_string()
}

/// 任意項目の正規化
///
/// 前後の空白を削除し、空文字列の場合はNoneとして扱う。
pub fn normalize_optional(text: Option<String>) -> Option<String> {
    text.map(|t| normalize_string(&t)).filter(|t| !t.is_empty())
}
