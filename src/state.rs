use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::assets::AssetStore;
use crate::config::Config;
use crate::llm::MediaGenerator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generator: Arc<MediaGenerator>,
    pub assets: AssetStore,
    /// Cancelled on shutdown; every in-flight generation waits on a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Arc<Config>, generator: MediaGenerator, assets: AssetStore) -> Self {
        AppState {
            config,
            generator: Arc::new(generator),
            assets,
            shutdown: CancellationToken::new(),
        }
    }
}
