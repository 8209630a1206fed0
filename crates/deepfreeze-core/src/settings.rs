use serde::{Deserialize, Serialize};

/// Document id of the singleton settings record.
pub const SETTINGS_ID: &str = "deepfreeze-settings";

/// Naming and storage settings shared by every deepfreeze repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub repo_name_prefix: String,
    pub bucket_name_prefix: String,
    pub base_path_prefix: String,
    /// Storage class new repositories are moved to.
    pub storage_class: String,
    /// `bucket` or `path`: which component rotates with each new repository.
    pub rotate_by: String,
    /// `oneup` (zero-padded counter) or `date` (year.month) suffixes.
    pub style: String,
    /// Suffix of the most recently created repository.
    #[serde(default)]
    pub last_suffix: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_name_prefix: "deepfreeze".to_string(),
            bucket_name_prefix: "deepfreeze".to_string(),
            base_path_prefix: "snapshots".to_string(),
            storage_class: "GLACIER".to_string(),
            rotate_by: "path".to_string(),
            style: "oneup".to_string(),
            last_suffix: None,
        }
    }
}
