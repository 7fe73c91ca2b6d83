//! Explicitly constructed application context shared by the refresher and the HTTP layer.

use std::sync::Arc;

use crate::config::Config;
use crate::provider::TopicProvider;
use crate::query::QueryService;
use crate::refresh::{RefreshMonitor, Refresher};
use crate::store::TopicStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<TopicStore>,
    pub query: QueryService,
    pub refresh: RefreshMonitor,
}

impl AppContext {
    /// Wire a fresh store to `provider`. The returned [`Refresher`] is the
    /// store's only writer; the context only reads.
    pub fn build(config: Config, provider: Arc<dyn TopicProvider>) -> (Self, Refresher) {
        let store = Arc::new(TopicStore::new());
        let refresher = Refresher::new(provider, Arc::clone(&store), config.refresh_settings());
        let ctx = Self {
            config: Arc::new(config),
            query: QueryService::new(Arc::clone(&store)),
            refresh: refresher.monitor(),
            store,
        };
        (ctx, refresher)
    }
}
