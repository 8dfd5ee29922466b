use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_MAX_SIZE_BYTES: u64 = 256 * 1024 * 1024;

fn default_max_size_bytes() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Filesystem {
        base_dir: PathBuf,
    },
    Memory {
        #[serde(default = "default_max_size_bytes")]
        max_size_bytes: u64,
        ttl_secs: Option<u64>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            ttl_secs: None,
        }
    }
}
