use crate::shared::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// キーごとの非同期ロック
///
/// 同じキーに対する書き込みを1つずつ実行する。誰も保持・待機していない
/// エントリは次の取得時に破棄される。
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// キーのロックを取得する（解放はガードのドロップ時）
    pub async fn lock(&self, key: &str) -> AppResult<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| AppError::storage_unavailable(format!("ロック表のエラー: {e}")))?;
            locks.retain(|_, entry| Arc::strong_count(entry) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        Ok(mutex.lock_owned().await)
    }

    /// 現在保持されているエントリ数
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
