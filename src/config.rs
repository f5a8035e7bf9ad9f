use std::env;
use std::path::PathBuf;
use std::time::Duration;

// Environment-driven defaults. `GEMINI_API_KEY` usually arrives via a .env
// file loaded in main.
lazy_static::lazy_static! {
    pub static ref GEMINI_API_BASE: String = env::var("GEMINI_API_BASE")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref GEMINI_API_KEY: String = env::var("GEMINI_API_KEY").unwrap_or_default();
    pub static ref CHAT_MODEL: String = env::var("CHATHDI_CHAT_MODEL")
        .unwrap_or_else(|_| "gemini-3-flash-preview".to_string());
    pub static ref IMAGE_MODEL_LOW: String = env::var("CHATHDI_IMAGE_MODEL_LOW")
        .unwrap_or_else(|_| "gemini-2.5-flash-image".to_string());
    pub static ref IMAGE_MODEL_HIGH: String = env::var("CHATHDI_IMAGE_MODEL_HIGH")
        .unwrap_or_else(|_| "gemini-3-pro-image-preview".to_string());
    pub static ref VIDEO_MODEL: String = env::var("CHATHDI_VIDEO_MODEL")
        .unwrap_or_else(|_| "veo-3.1-fast-generate-preview".to_string());
}

/// Seconds between polls of a long-running video operation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum number of poll cycles before a video job is abandoned (10 minutes
/// at the default interval).
pub const DEFAULT_MAX_POLLS: u32 = 60;

/// Directory holding the persisted session snapshot and preferences.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("CHATHDI_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chathdi")
}

/// Directory where downloaded generated videos are stored and served from.
pub fn media_dir() -> PathBuf {
    data_dir().join("media")
}
