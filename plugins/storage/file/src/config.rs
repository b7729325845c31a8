use std::path::PathBuf;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStoreConfig {
    /// Directory holding `records.jsonl` and `devices.jsonl`
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

// ════════════════════════════════════════════════════════════════
//  On-disk formats
// ════════════════════════════════════════════════════════════════

/// One line of `devices.jsonl`
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DeviceLine {
    pub device_id: String,
}
