use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of "now" for expiry decisions. Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
