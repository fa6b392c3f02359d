use super::{get_amount, get_timestamp, map_insert_error, to_db_timestamp};
use crate::models::Repayment;
use crate::shared::errors::{AppError, AppResult};
use rusqlite::{params, Connection, Row};

const SELECT_COLUMNS: &str = "SELECT id, loan_id, amount, repayment_date, notes,
    attachment_uri, created_at FROM repayments";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Repayment> {
    Ok(Repayment {
        id: row.get(0)?,
        loan_id: row.get(1)?,
        amount: get_amount(row, 2)?,
        repayment_date: get_timestamp(row, 3)?,
        notes: row.get(4)?,
        attachment_uri: row.get(5)?,
        created_at: get_timestamp(row, 6)?,
    })
}

/// 返済を挿入する
///
/// # 戻り値
/// 成功時はOk(())、IDが重複する場合は `DuplicateKey`、
/// 貸付が存在しない場合は `ForeignKeyViolation`
pub fn insert(conn: &Connection, repayment: &Repayment) -> AppResult<()> {
    conn.execute(
        "INSERT INTO repayments (id, loan_id, amount, repayment_date, notes,
                                 attachment_uri, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            repayment.id,
            repayment.loan_id,
            repayment.amount.to_string(),
            to_db_timestamp(&repayment.repayment_date),
            repayment.notes,
            repayment.attachment_uri,
            to_db_timestamp(&repayment.created_at),
        ],
    )
    .map_err(|e| {
        map_insert_error(
            e,
            ("返済", repayment.id.as_str()),
            ("貸付", repayment.loan_id.as_str()),
        )
    })?;
    Ok(())
}

/// 返済一覧を返済日の降順で取得する（貸付でフィルタリング可能）
pub fn find_all(conn: &Connection, loan_id: Option<&str>) -> AppResult<Vec<Repayment>> {
    let mut query = String::from(SELECT_COLUMNS);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(id) = loan_id {
        query.push_str(" WHERE loan_id = ?");
        params.push(Box::new(id.to_string()));
    }

    query.push_str(" ORDER BY repayment_date DESC, id ASC");

    let mut stmt = conn.prepare(&query)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let repayments = stmt.query_map(param_refs.as_slice(), map_row)?;
    repayments
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

/// 返済を削除する（存在しない場合は何もしない）
pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
    let affected = conn.execute("DELETE FROM repayments WHERE id = ?1", params![id])?;
    if affected == 0 {
        log::debug!("削除対象の返済が存在しません: id={id}");
    }
    Ok(())
}
