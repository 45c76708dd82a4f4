use std::path::PathBuf;

pub const DEFAULT_INDEX_URL: &str = "http://localhost:31411";
pub const DEFAULT_BUILD_COMMAND: [&str; 5] = ["python", "-m", "build", "--sdist", "--wheel"];
pub const CONFIG_FILENAME: &str = "insiders.toml";
const APP_DIR: &str = "insiders";

fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

pub fn repo_dir() -> PathBuf {
    cache_dir().join("repos")
}

pub fn dist_dir() -> PathBuf {
    cache_dir().join("dists")
}

/// 找不到使用者設定目錄時回傳 None
pub fn config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
}

pub fn build_command() -> Vec<String> {
    DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect()
}
