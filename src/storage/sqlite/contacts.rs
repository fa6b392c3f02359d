use super::{get_timestamp, map_insert_error, to_db_timestamp};
use crate::models::{Contact, ContactUpdate};
use crate::shared::errors::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = "SELECT id, name, phone_number, email, created_at FROM contacts";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        email: row.get(3)?,
        created_at: get_timestamp(row, 4)?,
    })
}

/// 連絡先を挿入する
///
/// # 引数
/// * `conn` - データベース接続
/// * `contact` - 保存する連絡先
///
/// # 戻り値
/// 成功時はOk(())、IDが重複する場合は `DuplicateKey`
pub fn insert(conn: &Connection, contact: &Contact) -> AppResult<()> {
    conn.execute(
        "INSERT INTO contacts (id, name, phone_number, email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            contact.id,
            contact.name,
            contact.phone_number,
            contact.email,
            to_db_timestamp(&contact.created_at),
        ],
    )
    .map_err(|e| {
        let key = ("連絡先", contact.id.as_str());
        map_insert_error(e, key, key)
    })?;
    Ok(())
}

/// IDで連絡先を取得する
pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<Contact>> {
    let contact = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(contact)
}

/// 連絡先一覧を名前の昇順で取得する
pub fn find_all(conn: &Connection) -> AppResult<Vec<Contact>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name ASC, id ASC"))?;
    let contacts = stmt.query_map([], map_row)?;
    contacts
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

/// 連絡先を更新する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - 連絡先ID
/// * `update` - 更新内容（指定されたフィールドのみ反映）
///
/// # 戻り値
/// 更新後の連絡先、存在しない場合は `NotFound`
pub fn update(conn: &Connection, id: &str, update: &ContactUpdate) -> AppResult<Contact> {
    // 既存の連絡先を取得
    let mut contact = find_by_id(conn, id)?.ok_or_else(|| AppError::not_found("連絡先", id))?;
    contact.apply_update(update);

    conn.execute(
        "UPDATE contacts SET name = ?1, phone_number = ?2, email = ?3 WHERE id = ?4",
        params![contact.name, contact.phone_number, contact.email, id],
    )?;

    Ok(contact)
}

/// 連絡先を削除し、その貸付と返済もまとめて削除する
///
/// # 戻り値
/// 削除された貸付の件数
pub fn delete_cascade(conn: &Connection, id: &str) -> AppResult<usize> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "DELETE FROM repayments
         WHERE loan_id IN (SELECT id FROM loans WHERE contact_id = ?1)",
        params![id],
    )?;
    let removed_loans = tx.execute("DELETE FROM loans WHERE contact_id = ?1", params![id])?;
    tx.execute("DELETE FROM contacts WHERE id = ?1", params![id])?;

    tx.commit()?;
    Ok(removed_loans)
}
