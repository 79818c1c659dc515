pub mod disk;
pub mod feed;
pub mod memory;

use crate::core::config::AppConfig;
use anyhow::Result;
use disk::DiskStore;
use std::sync::Arc;

pub use feed::{BarInsert, ChangeFeed};
pub use memory::MemoryCache;

/// Opens the persistent store under the configured data directory.
pub fn open_store(config: &AppConfig) -> Result<Arc<DiskStore>> {
    let path = config.default_data_path()?.join("store");
    Ok(Arc::new(DiskStore::open(&path)?))
}
