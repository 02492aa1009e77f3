use crate::adapters::{CommandExecutor, ObjectStore};
use crate::config::AppConfig;
use std::sync::Arc;

/// Shared dependencies, built once in `main` and passed down explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub executor: Arc<dyn CommandExecutor>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            executor,
        }
    }
}
