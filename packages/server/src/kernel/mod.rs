//! Kernel - core infrastructure.
//!
//! Holds the adapter seams (publisher, dedupe store) and the persisted job
//! model. Kernel is for INFRASTRUCTURE only, not business logic; business
//! logic (schedule resolution, variant selection) lives in `domains/*`.

pub mod dedupe;
pub mod jobs;
pub mod policy;

use std::sync::Arc;

use publisher_client::Publisher;
use sqlx::PgPool;

use dedupe::DedupeStore;

/// Process-wide dependency-injection container, holding the two seams this
/// crate's binaries wire up at startup.
pub struct AppContext {
    pub db: PgPool,
    pub dedupe: Arc<dyn DedupeStore>,
    pub publisher: Arc<dyn Publisher>,
}

impl AppContext {
    pub fn new(db: PgPool, dedupe: Arc<dyn DedupeStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            db,
            dedupe,
            publisher,
        }
    }
}
