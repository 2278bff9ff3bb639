use kabu_core::store::error::StoreError;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static ROOT_DIR: OnceLock<PathBuf> = OnceLock::new();

/// 设置存储层的数据根目录。
///
/// # Logic
/// 1. 尝试将指定的路径保存到全局静态变量中。
/// 2. 如果已经设置过，则本次设置无效。
///
/// # Arguments
/// * `path` - 存储数据的根目录路径。
///
/// # Returns
/// * 本次调用是否生效。
pub fn set_root_dir(path: PathBuf) -> bool {
    ROOT_DIR.set(path).is_ok()
}

/// 获取当前配置的数据根目录，未设置时为 "data"。
pub(crate) fn get_root_dir() -> PathBuf {
    ROOT_DIR
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// # Summary
/// 确保数据库文件所在目录存在并返回完整路径。
///
/// # Arguments
/// * `dir` - 数据目录。
/// * `file` - 数据库文件名。
pub(crate) fn prepare_db_path(dir: &Path, file: &str) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::InitError(e.to_string()))?;
    Ok(dir.join(file))
}
