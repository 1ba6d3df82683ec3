use std::path::PathBuf;

pub const DATABASE_FILE_NAME: &str = "events.db";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const SECRETS_FILE_NAME: &str = "secrets.json";
pub const PASSWORD_FILE_NAME: &str = "generated_password.txt";

const APP_DIR_NAME: &str = "vrclog-companion";

/// Per-user data directory. Uses `VC_DATA_DIR` if set, otherwise the
/// platform data dir (falls back to the current directory when that is
/// unavailable, e.g. minimal containers).
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VC_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_dir()
        .map(|base| base.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn database_path() -> PathBuf {
    data_dir().join(DATABASE_FILE_NAME)
}

pub fn config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE_NAME)
}

pub fn secrets_path() -> PathBuf {
    data_dir().join(SECRETS_FILE_NAME)
}
