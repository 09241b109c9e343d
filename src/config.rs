//! Configuration types.

use std::path::PathBuf;

/// Default campaign log path.
pub const DEFAULT_LOG_PATH: &str = "log.json";

/// Default mail folder that matched replies are archived into.
pub const DEFAULT_ARCHIVE_FOLDER: &str = "automail";

/// Campaign configuration, passed to the dispatcher at construction.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Campaign log file.
    pub log_path: PathBuf,
    /// Folder replies are moved into once matched.
    pub archive_folder: String,
    /// Render and report instead of sending or logging.
    pub debug: bool,
    /// Base directory for relative `++` inclusion paths.
    pub include_dir: Option<PathBuf>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            archive_folder: DEFAULT_ARCHIVE_FOLDER.to_string(),
            debug: false,
            include_dir: None,
        }
    }
}
