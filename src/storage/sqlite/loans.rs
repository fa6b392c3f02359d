use super::{
    get_amount, get_optional_timestamp, get_timestamp, map_insert_error,
    to_db_optional_timestamp, to_db_timestamp,
};
use crate::models::{Loan, LoanUpdate};
use crate::shared::errors::{AppError, AppResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = "SELECT id, contact_id, amount, date_issued, due_date, notes,
    attachment_uri, created_at, updated_at FROM loans";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        amount: get_amount(row, 2)?,
        date_issued: get_timestamp(row, 3)?,
        due_date: get_optional_timestamp(row, 4)?,
        notes: row.get(5)?,
        attachment_uri: row.get(6)?,
        created_at: get_timestamp(row, 7)?,
        updated_at: get_timestamp(row, 8)?,
    })
}

/// 貸付を挿入する
///
/// # 引数
/// * `conn` - データベース接続
/// * `loan` - 保存する貸付
///
/// # 戻り値
/// 成功時はOk(())、IDが重複する場合は `DuplicateKey`、
/// 連絡先が存在しない場合は `ForeignKeyViolation`
pub fn insert(conn: &Connection, loan: &Loan) -> AppResult<()> {
    conn.execute(
        "INSERT INTO loans (id, contact_id, amount, date_issued, due_date, notes,
                            attachment_uri, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            loan.id,
            loan.contact_id,
            loan.amount.to_string(),
            to_db_timestamp(&loan.date_issued),
            to_db_optional_timestamp(&loan.due_date),
            loan.notes,
            loan.attachment_uri,
            to_db_timestamp(&loan.created_at),
            to_db_timestamp(&loan.updated_at),
        ],
    )
    .map_err(|e| {
        map_insert_error(
            e,
            ("貸付", loan.id.as_str()),
            ("連絡先", loan.contact_id.as_str()),
        )
    })?;
    Ok(())
}

/// IDで貸付を取得する
pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<Loan>> {
    let loan = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(loan)
}

/// 貸付一覧を貸付日の降順で取得する（連絡先でフィルタリング可能）
///
/// # 引数
/// * `conn` - データベース接続
/// * `contact_id` - 連絡先フィルター（オプション）
pub fn find_all(conn: &Connection, contact_id: Option<&str>) -> AppResult<Vec<Loan>> {
    let mut query = String::from(SELECT_COLUMNS);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(id) = contact_id {
        query.push_str(" WHERE contact_id = ?");
        params.push(Box::new(id.to_string()));
    }

    query.push_str(" ORDER BY date_issued DESC, id ASC");

    let mut stmt = conn.prepare(&query)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let loans = stmt.query_map(param_refs.as_slice(), map_row)?;
    loans.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
}

/// 貸付を更新する
///
/// 返済期日・メモ・添付ファイルのみが対象。`updated_at` は常に現在時刻になる。
pub fn update(conn: &Connection, id: &str, update: &LoanUpdate) -> AppResult<Loan> {
    let mut loan = find_by_id(conn, id)?.ok_or_else(|| AppError::not_found("貸付", id))?;
    loan.apply_update(update, Utc::now());

    conn.execute(
        "UPDATE loans SET due_date = ?1, notes = ?2, attachment_uri = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            to_db_optional_timestamp(&loan.due_date),
            loan.notes,
            loan.attachment_uri,
            to_db_timestamp(&loan.updated_at),
            id,
        ],
    )?;

    Ok(loan)
}

/// 貸付とその返済を削除する
///
/// # 戻り値
/// 削除された返済の件数
pub fn delete_cascade(conn: &Connection, id: &str) -> AppResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM repayments WHERE loan_id = ?1", params![id])?;
    tx.execute("DELETE FROM loans WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(removed)
}
