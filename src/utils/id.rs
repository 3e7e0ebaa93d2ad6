//! 调用 ID 生成器
//!
//! 为挂起调用生成短标识，便于在日志中关联入队、重放和超时。
//! 格式：10 位 62 进制字符串（0-9, a-z, A-Z）

use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// # Example
///
/// ```
/// use chips_loader::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| BASE62_CHARS[rng.gen_range(0..BASE62_CHARS.len())] as char)
        .collect()
}

/// 验证 ID 格式是否有效
///
/// ```
/// use chips_loader::utils::id::is_valid_id;
///
/// assert!(is_valid_id("a1B2c3D4e5"));
/// assert!(!is_valid_id("too-short"));
/// ```
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.chars().all(|c| c.is_ascii_alphanumeric())
}
