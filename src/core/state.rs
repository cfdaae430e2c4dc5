use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::Store;
use crate::services::cache::Cache;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    redis: RedisHandle,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        redis: RedisHandle,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, cache, redis }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub(crate) fn cache(&self) -> &dyn Cache {
        self.inner.cache.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }
}
