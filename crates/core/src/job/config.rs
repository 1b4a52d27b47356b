use serde::{Deserialize, Serialize};

/// Per-job limits and naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Images per archive.
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Characters of the image title kept in entry names.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
    #[serde(default = "default_entry_extension")]
    pub entry_extension: String,
    /// Bytes of one image held back so a failed download can be dropped
    /// from the archive. Larger images are streamed.
    #[serde(default = "default_entry_buffer_bytes")]
    pub entry_buffer_bytes: usize,
}

fn default_max_images() -> usize {
    10
}

fn default_max_name_len() -> usize {
    50
}

fn default_entry_extension() -> String {
    "jpg".to_string()
}

fn default_entry_buffer_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
            max_name_len: default_max_name_len(),
            entry_extension: default_entry_extension(),
            entry_buffer_bytes: default_entry_buffer_bytes(),
        }
    }
}
