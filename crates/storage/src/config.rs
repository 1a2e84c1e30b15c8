use std::path::PathBuf;

/// Options accepted by `Engine::open` (page size, cache capacity, optional
/// WAL path, checkpoint threshold).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub page_size: u32,
    pub page_cache_capacity: u64,
    pub wal_path: Option<PathBuf>,
    pub wal_checkpoint_threshold: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            page_cache_capacity: 1024,
            wal_path: None,
            wal_checkpoint_threshold: 1000,
        }
    }
}
