use std::path::PathBuf;

const APP_DIR: &str = "campuschat";

/// `<config dir>/campuschat`, or the working directory when the platform has
/// no notion of one.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Cache file names inside the data directory.
pub const AUTH_FILE: &str = "auth.json";
pub const CONVERSATIONS_FILE: &str = "conversations.json";
pub const DOCUMENTS_FILE: &str = "documents.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_end_in_app_dir() {
        assert!(config_path().ends_with("campuschat/config.json"));
        assert!(data_dir().ends_with("campuschat"));
    }
}
