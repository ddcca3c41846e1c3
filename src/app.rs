//! Shared services for the HTTP API and server actions.

use std::sync::Arc;

use crate::auth::SessionSigner;
use crate::cache::ViewCache;
use crate::config::FeatureFlags;
use crate::data::DataLayer;
use crate::db::Database;
use crate::docstore::DocumentStore;
use crate::ops::scoring::LeadScorer;

/// Everything a request needs, built once at startup and shared by `Arc`.
pub struct AppContext {
    pub db: Arc<dyn Database>,
    pub docs: Arc<dyn DocumentStore>,
    pub data: DataLayer,
    pub flags: Arc<FeatureFlags>,
    pub cache: ViewCache,
    pub scorer: Arc<dyn LeadScorer>,
    pub sessions: SessionSigner,
}

impl AppContext {
    pub fn new(
        db: Arc<dyn Database>,
        docs: Arc<dyn DocumentStore>,
        flags: Arc<FeatureFlags>,
        scorer: Arc<dyn LeadScorer>,
        sessions: SessionSigner,
        cache_capacity: usize,
    ) -> Self {
        let data = DataLayer::new(Arc::clone(&db), Arc::clone(&docs), Arc::clone(&flags));
        Self {
            db,
            docs,
            data,
            flags,
            cache: ViewCache::new(cache_capacity),
            scorer,
            sessions,
        }
    }
}
