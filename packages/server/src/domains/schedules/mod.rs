//! Schedules: when and what to fire next.

pub mod models;
pub mod resolver;
pub mod rrule_cache;

pub use models::{Schedule, ScheduleKind};
pub use resolver::resolve;
pub use rrule_cache::RRuleCache;
