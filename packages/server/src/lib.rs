// Durable scheduler and publish pipeline core.
//
// Resolves one-shot/cron/RRULE schedules, selects content variants under a
// deterministic seeded policy, and drives a Postgres-backed job queue through
// a strict state machine to publish posts via a pluggable `Publisher`.

pub mod common;
pub mod config;
pub mod domains;
pub mod error;
pub mod kernel;

pub use config::*;
