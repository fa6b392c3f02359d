/// 環境設定関連のモジュール
pub mod environment;
/// アプリケーション初期化
pub mod initialization;

// 便利な再エクスポート
pub use environment::{
    get_database_filename, get_json_store_filename, initialize_logging_system,
    load_environment_variables, load_environment_variables_from, Environment, EnvironmentConfig,
    DEFAULT_STORAGE_TIMEOUT_MS,
};
pub use initialization::{initialize_application, log_initialization_complete, InitializationResult};
