pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod utils;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::api::student_cache::StudentCache;
use crate::engine::LastRun;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub student_cache: StudentCache,
    pub rate_limiter: Arc<RateLimiter>,
    /// Summary of the latest monthly leave activator cycle
    pub last_leave_run: LastRun,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let student_cache = StudentCache::new(std::time::Duration::from_secs(
            config.students.cache_ttl_seconds,
        ));
        Self {
            config,
            db,
            student_cache,
            rate_limiter,
            last_leave_run: LastRun::default(),
        }
    }
}
