//! `PublishJob` persistence, queueing, worker runtime, and recovery sweeper.

pub mod job;
mod queue;
mod sweeper;
mod tick;
mod worker;

pub use job::{JobStatus, PublishJob};
pub use queue::PostgresJobQueue;
pub use sweeper::{RecoverySweeper, SweepReport};
pub use tick::{SchedulerTick, TickReport};
pub use worker::WorkerRuntime;
