use crate::features::app_state::OverpaymentPolicy;
use crate::shared::errors::{AppError, AppResult};
use crate::storage::StorageBackend;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ストレージ呼び出しのタイムアウトの既定値（ミリ秒）
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5000;

/// アプリケーションの実行環境を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// 開発環境
    Development,
    /// プロダクション環境
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// 環境設定を管理する構造体
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// 実行環境
    pub environment: Environment,
    /// デバッグモードの有効/無効
    pub debug_mode: bool,
    /// ログレベル
    pub log_level: String,
    /// ストレージバックエンド
    pub storage_backend: StorageBackend,
    /// データディレクトリ
    pub data_dir: PathBuf,
    /// 過払い時の扱い
    pub overpayment_policy: OverpaymentPolicy,
    /// ストレージ呼び出しのタイムアウト
    pub storage_timeout: Duration,
}

impl EnvironmentConfig {
    /// .envファイルと環境変数から設定を読み込む
    ///
    /// # 戻り値
    /// 環境設定、または値が不正な場合は `Configuration` エラー
    pub fn from_env() -> AppResult<Self> {
        load_environment_variables();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の取得関数から設定を読み込む
    ///
    /// # 引数
    /// * `lookup` - 変数名から値を返す関数
    ///
    /// # 対象の変数
    /// - `ENVIRONMENT`: development / production
    /// - `LOG_LEVEL`: error / warn / info / debug / trace
    /// - `PAYBACK_STORAGE_BACKEND`: memory / json / sqlite（既定はsqlite）
    /// - `PAYBACK_DATA_DIR`: データディレクトリ
    /// - `PAYBACK_OVERPAYMENT_POLICY`: allow_with_warning / reject
    /// - `PAYBACK_STORAGE_TIMEOUT_MS`: ストレージ呼び出しのタイムアウト
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = parse_environment(lookup("ENVIRONMENT").as_deref());
        let debug_mode = environment == Environment::Development;
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| {
            if debug_mode {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        let storage_backend = match lookup("PAYBACK_STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Sqlite,
        };

        let data_dir = match lookup("PAYBACK_DATA_DIR") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir()?,
        };

        let overpayment_policy = match lookup("PAYBACK_OVERPAYMENT_POLICY") {
            Some(value) => value.parse()?,
            None => OverpaymentPolicy::default(),
        };

        let storage_timeout = match lookup("PAYBACK_STORAGE_TIMEOUT_MS") {
            Some(value) => parse_timeout_ms(&value)?,
            None => Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        };

        Ok(Self {
            environment,
            debug_mode,
            log_level,
            storage_backend,
            data_dir,
            overpayment_policy,
            storage_timeout,
        })
    }

    /// ストレージファイルのパス（メモリバックエンドの場合はNone）
    pub fn storage_path(&self) -> Option<PathBuf> {
        match self.storage_backend {
            StorageBackend::Memory => None,
            StorageBackend::JsonFile => Some(
                self.data_dir
                    .join(get_json_store_filename(&self.environment)),
            ),
            StorageBackend::Sqlite => Some(
                self.data_dir
                    .join(get_database_filename(&self.environment)),
            ),
        }
    }

    /// プロダクション環境かどうかを判定
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// 実行環境を判定する
///
/// # 判定ロジック
/// 1. 環境変数 ENVIRONMENT が設定されていればそれを使用
/// 2. デバッグビルドの場合は Development
/// 3. リリースビルドの場合は Production
fn parse_environment(value: Option<&str>) -> Environment {
    if let Some(env_var) = value {
        let env = match env_var.trim() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        log::debug!("環境判定: 実行時環境変数を使用 -> {env_var} -> {env:?}");
        return env;
    }

    // フォールバック: ビルド設定に基づく判定
    let env = if cfg!(debug_assertions) {
        Environment::Development
    } else {
        Environment::Production
    };
    log::debug!(
        "環境判定: ビルド設定を使用 -> debug_assertions={} -> {env:?}",
        cfg!(debug_assertions)
    );
    env
}

fn default_data_dir() -> AppResult<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("payback"))
        .ok_or_else(|| {
            AppError::configuration(
                "データディレクトリを特定できません。PAYBACK_DATA_DIRを設定してください",
            )
        })
}

fn parse_timeout_ms(value: &str) -> AppResult<Duration> {
    let millis: u64 = value.trim().parse().map_err(|_| {
        AppError::configuration(format!(
            "PAYBACK_STORAGE_TIMEOUT_MSが不正です: {value}"
        ))
    })?;
    if millis == 0 {
        return Err(AppError::configuration(
            "PAYBACK_STORAGE_TIMEOUT_MSは1以上である必要があります",
        ));
    }
    Ok(Duration::from_millis(millis))
}

/// 環境に応じたデータベースファイル名を取得する
///
/// # ファイル名の規則
/// - 開発環境: "dev_payback.db"
/// - プロダクション環境: "payback.db"
pub fn get_database_filename(env: &Environment) -> &'static str {
    match env {
        Environment::Development => "dev_payback.db",
        Environment::Production => "payback.db",
    }
}

/// 環境に応じたJSONストアのファイル名を取得する
pub fn get_json_store_filename(env: &Environment) -> &'static str {
    match env {
        Environment::Development => "dev_payback.json",
        Environment::Production => "payback.json",
    }
}

/// 環境に応じた.envファイルを読み込む
///
/// カレントディレクトリの `.env`（本番環境では `.env.production`）を対象とする。
/// すでに設定されている環境変数は上書きしない。
pub fn load_environment_variables() {
    load_environment_variables_from(Path::new("."));
}

/// 指定ディレクトリから環境に応じた.envファイルを読み込む
///
/// # 処理内容
/// 1. 環境に応じた.envファイルを読み込み
/// 2. 見つからない場合はデフォルトの.envにフォールバック
///
/// # 戻り値
/// 読み込んだファイルのパス（見つからない場合はNone）
pub fn load_environment_variables_from(base_dir: &Path) -> Option<PathBuf> {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    // 環境に応じた.envファイルのパスを決定
    let env_file = match environment.as_str() {
        "production" => ".env.production",
        _ => ".env",
    };

    log::debug!("環境: {environment}, 読み込み対象: {env_file}");

    let primary = base_dir.join(env_file);
    if dotenv::from_path(&primary).is_ok() {
        log::info!("{env_file}ファイルを読み込みました");
        return Some(primary);
    }

    if env_file != ".env" {
        let fallback = base_dir.join(".env");
        if dotenv::from_path(&fallback).is_ok() {
            log::warn!("{env_file}が見つからないため、デフォルトの.envファイルを読み込みました");
            return Some(fallback);
        }
    }

    log::warn!("環境変数ファイルが見つかりません。直接設定された環境変数を使用します。");
    None
}

/// ログシステムを初期化する
///
/// すでに初期化されている場合は何もしない。
///
/// # 引数
/// * `config` - 環境設定
pub fn initialize_logging_system(config: &EnvironmentConfig) {
    let log_level = match config.log_level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    let initialized = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .try_init();

    if initialized.is_ok() {
        log::info!(
            "ログシステムを初期化しました: level={}, environment={}",
            config.log_level,
            config.environment.as_str()
        );
    }
}
