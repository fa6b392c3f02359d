use crate::shared::errors::{AppError, AppResult};
use rusqlite::Connection;
use std::path::Path;

/// データベース接続を開き、テーブルを作成する
///
/// # 引数
/// * `database_path` - データベースファイルのパス
///
/// # 戻り値
/// データベース接続、または失敗時はエラー
///
/// # 処理内容
/// 1. データベースディレクトリの確保
/// 2. データベース接続の開設
/// 3. 外部キー制約の有効化
/// 4. テーブル作成
pub fn initialize_database(database_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::storage_unavailable(format!(
                    "データベースディレクトリの作成に失敗: {e}"
                ))
            })?;
            log::info!("データベースディレクトリを作成: {:?}", parent);
        }
    }

    let conn = Connection::open(database_path).map_err(|e| {
        AppError::storage_unavailable(format!("データベースを開けませんでした: {e}"))
    })?;

    configure_connection(&conn)?;
    create_tables(&conn)?;

    log::info!("データベースを初期化しました: {:?}", database_path);

    Ok(conn)
}

/// メモリ上のデータベースを初期化する（テスト用）
pub fn initialize_in_memory_database() -> AppResult<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| {
        AppError::storage_unavailable(format!("データベースを開けませんでした: {e}"))
    })?;
    configure_connection(&conn)?;
    create_tables(&conn)?;
    Ok(conn)
}

/// 接続ごとの設定を適用する
fn configure_connection(conn: &Connection) -> AppResult<()> {
    // 外部キー制約は接続ごとに有効化が必要
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// データベーステーブルを作成する
///
/// # 引数
/// * `conn` - データベース接続
///
/// # 戻り値
/// 成功時はOk(())、失敗時はエラー
pub fn create_tables(conn: &Connection) -> AppResult<()> {
    create_contacts_table(conn)?;
    create_loans_table(conn)?;
    create_repayments_table(conn)?;
    create_indexes(conn)?;
    Ok(())
}

/// 連絡先テーブルを作成する
fn create_contacts_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(trim(name)) > 0),
            phone_number TEXT,
            email TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// 貸付テーブルを作成する
///
/// 金額は丸め誤差を避けるためTEXTで保存する。
fn create_loans_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS loans (
            id TEXT PRIMARY KEY,
            contact_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            date_issued TEXT NOT NULL,
            due_date TEXT,
            notes TEXT,
            attachment_uri TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
        )",
        [],
    )?;
    Ok(())
}

/// 返済テーブルを作成する
fn create_repayments_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS repayments (
            id TEXT PRIMARY KEY,
            loan_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            repayment_date TEXT NOT NULL,
            notes TEXT,
            attachment_uri TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (loan_id) REFERENCES loans(id) ON DELETE CASCADE
        )",
        [],
    )?;
    Ok(())
}

/// インデックスを作成する
fn create_indexes(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_loans_contact_id ON loans(contact_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_loans_date_issued ON loans(date_issued)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_repayments_loan_id ON repayments(loan_id)",
        [],
    )?;

    Ok(())
}
