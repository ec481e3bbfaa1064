use std::sync::Arc;

use super::{
    avatar::{BlobStore, MemoryBlobStore},
    config::Config,
    database::{MemoryStore, Store},
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
}

impl State {
    pub fn new(config: Config, store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            blobs,
        })
    }

    pub fn in_memory(config: Config) -> Arc<Self> {
        let blobs = Arc::new(MemoryBlobStore::new(&config.avatar_base_url));

        Self::new(config, Arc::new(MemoryStore::new()), blobs)
    }
}
