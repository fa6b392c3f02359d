use thiserror::Error;

/// アプリケーション全体で使用される統一エラー型
#[derive(Debug, Error)]
pub enum AppError {
    /// バリデーション関連のエラー（ストレージ呼び出し前に検出される）
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// リソースが見つからない場合のエラー
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 同じIDのレコードが既に存在する場合のエラー
    #[error("IDが重複しています: {0}")]
    DuplicateKey(String),

    /// 参照先のレコードが存在しない場合のエラー
    #[error("参照先が存在しません: {0}")]
    ForeignKeyViolation(String),

    /// ストレージが初期化されていない、または接続できない場合のエラー
    #[error("ストレージを利用できません: {0}")]
    StorageUnavailable(String),

    /// 過払いポリシーにより拒否された返済
    #[error("過払いのため返済を記録できません: {0}")]
    Overpayment(String),

    /// データベース関連のエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// 設定関連のエラー
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// I/O関連のエラー
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    /// JSON解析エラー
    #[error("JSON解析エラー: {0}")]
    Json(#[from] serde_json::Error),
}

/// エラーの重要度を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// 低重要度（ユーザー入力エラーなど）
    Low,
    /// 中重要度（参照整合性エラーなど）
    Medium,
    /// 高重要度（データベースエラーなど）
    High,
    /// 最重要（ストレージ使用不可など）
    Critical,
}

impl AppError {
    /// ユーザーに表示するためのフレンドリーなメッセージを取得
    ///
    /// # 戻り値
    /// ユーザーに表示可能なエラーメッセージ
    pub fn user_message(&self) -> &str {
        match self {
            AppError::Validation(msg) => msg,
            AppError::NotFound(msg) => msg,
            AppError::DuplicateKey(_) => "同じIDのデータが既に存在します",
            AppError::ForeignKeyViolation(_) => "関連するデータが見つかりません",
            AppError::StorageUnavailable(_) => "データの保存先に接続できません",
            AppError::Overpayment(msg) => msg,
            AppError::Database(_) => "データベース操作でエラーが発生しました",
            AppError::Configuration(_) => "設定エラーが発生しました",
            AppError::Io(_) => "ファイル操作でエラーが発生しました",
            AppError::Json(_) => "データ形式の解析でエラーが発生しました",
        }
    }

    /// エラーの詳細情報を取得（ログ出力用）
    pub fn details(&self) -> String {
        format!("{self}")
    }

    /// エラーの重要度を取得
    ///
    /// # 戻り値
    /// エラーの重要度レベル
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::Validation(_) => ErrorSeverity::Low,
            AppError::NotFound(_) => ErrorSeverity::Low,
            AppError::Overpayment(_) => ErrorSeverity::Low,
            AppError::DuplicateKey(_) => ErrorSeverity::Medium,
            AppError::ForeignKeyViolation(_) => ErrorSeverity::Medium,
            AppError::Io(_) => ErrorSeverity::Medium,
            AppError::Json(_) => ErrorSeverity::Medium,
            AppError::Database(_) => ErrorSeverity::High,
            AppError::Configuration(_) => ErrorSeverity::High,
            AppError::StorageUnavailable(_) => ErrorSeverity::Critical,
        }
    }

    /// 呼び出し元が致命的でないものとして扱えるエラーかどうか
    ///
    /// `NotFound` はユーザーに通知するだけでよい。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::NotFound(_) | AppError::Overpayment(_)
        )
    }

    /// バリデーションエラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `message` - バリデーションエラーメッセージ
    ///
    /// # 戻り値
    /// バリデーションエラー
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AppError::Validation(message.into())
    }

    /// リソース未発見エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `resource` - 見つからなかったリソース名
    /// * `id` - 見つからなかったID
    ///
    /// # 戻り値
    /// リソース未発見エラー
    pub fn not_found<S: Into<String>>(resource: S, id: &str) -> Self {
        AppError::NotFound(format!("ID {id} の{}が見つかりません", resource.into()))
    }

    /// ID重複エラーを作成するヘルパー関数
    pub fn duplicate_key<S: Into<String>>(resource: S, id: &str) -> Self {
        AppError::DuplicateKey(format!("{} (ID {id})", resource.into()))
    }

    /// 参照整合性エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `resource` - 参照先のリソース名
    /// * `id` - 存在しなかった参照先ID
    pub fn foreign_key<S: Into<String>>(resource: S, id: &str) -> Self {
        AppError::ForeignKeyViolation(format!("{} (ID {id})", resource.into()))
    }

    /// ストレージ使用不可エラーを作成するヘルパー関数
    pub fn storage_unavailable<S: Into<String>>(message: S) -> Self {
        AppError::StorageUnavailable(message.into())
    }

    /// 設定エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `message` - 設定エラーメッセージ
    ///
    /// # 戻り値
    /// 設定エラー
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        AppError::Configuration(message.into())
    }
}

/// AppErrorからStringへの変換（表示層での使用のため）
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.user_message().to_string()
    }
}

/// rusqlite::ErrorからAppErrorへの変換
///
/// ロック待ちの期限切れ（BUSY / LOCKED）は `StorageUnavailable` として扱う。
impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                AppError::StorageUnavailable(error.to_string())
            }
            _ => AppError::Database(error.to_string()),
        }
    }
}

/// Result型のエイリアス（アプリケーション全体で使用）
pub type AppResult<T> = Result<T, AppError>;
