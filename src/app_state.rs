use std::sync::Arc;

use crate::db::SubmissionStore;
use crate::services::queue::JobQueueManager;
use crate::services::rate_limit::RedisRateLimiter;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubmissionStore>,
    pub queue: JobQueueManager,
    /// Present when rate limiting is shared through Redis.
    pub redis: Option<Arc<RedisRateLimiter>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        queue: JobQueueManager,
        redis: Option<Arc<RedisRateLimiter>>,
    ) -> Self {
        Self { store, queue, redis }
    }
}
