//! Shared enums referenced by both the schedule and job models.

use serde::{Deserialize, Serialize};

/// How a schedule picks a variant from its template's active pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "selection_policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    RandomUniform,
    RandomWeighted,
    RoundRobin,
    NoRepeatWindow,
}

/// Scope over which the no-repeat window is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "no_repeat_scope", rename_all = "snake_case")]
pub enum NoRepeatScope {
    #[default]
    Template,
    Schedule,
}
