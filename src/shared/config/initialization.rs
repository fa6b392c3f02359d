use crate::features::app_state::{LedgerSettings, LedgerState};
use crate::shared::config::{Environment, EnvironmentConfig};
use crate::shared::errors::{AppError, AppResult};
use crate::storage::{open_storage, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};

/// アプリケーション初期化の結果を表す構造体
pub struct InitializationResult {
    /// 初回起動かどうか
    pub is_first_run: bool,
    /// データディレクトリのパス
    pub data_dir: PathBuf,
    /// ストレージファイルのパス（メモリバックエンドの場合はNone）
    pub storage_path: Option<PathBuf>,
    /// 実行環境
    pub environment: Environment,
    /// 使用中のストレージバックエンド
    pub storage_backend: StorageBackend,
    /// 読み込み済みの台帳
    pub state: LedgerState,
}

/// アプリケーションの初期化を実行する
///
/// # 引数
/// * `config` - 環境設定
///
/// # 戻り値
/// 初期化結果、または失敗時はエラー
///
/// # 処理内容
/// 1. データディレクトリの作成
/// 2. 初回起動の判定
/// 3. ストレージの初期化
/// 4. 台帳の読み込み
pub async fn initialize_application(config: &EnvironmentConfig) -> AppResult<InitializationResult> {
    let storage_path = config.storage_path();

    if storage_path.is_some() {
        ensure_data_directory(&config.data_dir)?;
    }

    // 初回起動かどうかを判定（ストレージファイルの存在で判定）
    let is_first_run = storage_path.as_ref().map_or(true, |path| !path.exists());

    if is_first_run {
        log_first_run_initialization(config, storage_path.as_deref());
    }

    let storage = open_storage(config)?;
    let state = LedgerState::load(storage, LedgerSettings::from_config(config)).await?;

    Ok(InitializationResult {
        is_first_run,
        data_dir: config.data_dir.clone(),
        storage_path,
        environment: config.environment,
        storage_backend: config.storage_backend,
        state,
    })
}

/// データディレクトリを確実に作成する
fn ensure_data_directory(data_dir: &Path) -> AppResult<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir).map_err(|e| {
            AppError::configuration(format!("データディレクトリの作成に失敗: {e}"))
        })?;

        log::info!("データディレクトリを作成しました: {data_dir:?}");
    }
    Ok(())
}

/// 初回起動時の初期化ログを出力する
fn log_first_run_initialization(config: &EnvironmentConfig, storage_path: Option<&Path>) {
    log::info!("=== アプリケーション初回起動 ===");
    log::info!("実行環境: {:?}", config.environment);
    log::info!("ストレージ: {}", config.storage_backend);
    log::info!("データディレクトリ: {:?}", config.data_dir);
    if let Some(path) = storage_path {
        log::info!("ストレージファイル: {path:?}");
    }
    log::info!("初期化を開始します...");
}

/// 初期化完了ログを出力する
///
/// # 引数
/// * `result` - 初期化結果
pub fn log_initialization_complete(result: &InitializationResult) {
    if result.is_first_run {
        log::info!("=== 初期化完了 ===");
        log::info!("初回起動の初期化が正常に完了しました");
    } else {
        log::info!("アプリケーション起動完了（既存データを使用）");
    }
    log::info!("環境: {:?}", result.environment);
    log::info!("ストレージ: {}", result.storage_backend);
    log::info!(
        "連絡先: {}件, 貸付: {}件",
        result.state.contacts().len(),
        result.state.loans().len()
    );
}
