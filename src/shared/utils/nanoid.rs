use nanoid::nanoid;

/// 識別子の最大長
pub const MAX_ID_LENGTH: usize = 64;

/// レコードID用のnanoIdを生成する
///
/// # 戻り値
/// 21文字のURL-safeなnanoId
///
/// # 特性
/// - 文字セット: A-Za-z0-9_- (64文字)
/// - 長さ: 21文字
/// - 衝突確率: 1兆個のIDで1%未満
pub fn generate_id() -> String {
    nanoid!()
}

/// 識別子が有効な形式かどうかを検証する
///
/// 生成したIDだけでなく、既存データから読み込んだIDも受け付けるため
/// 長さは21文字に固定しない。
///
/// # 検証条件
/// - 1文字以上、64文字以内
/// - URL-safe文字（A-Za-z0-9_-）のみを含む
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
