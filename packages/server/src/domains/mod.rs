pub mod posts;
pub mod schedules;
pub mod variants;
