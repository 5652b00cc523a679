//! `select(schedule, planned_at) -> (variant | none, seed)`.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use crate::common::PostVariantId;
use crate::domains::posts::{PostVariant, VariantSelectionHistory};
use crate::domains::schedules::Schedule;
use crate::error::Result;
use crate::kernel::policy::SelectionPolicy;

pub struct Selection {
    pub variant_id: Option<PostVariantId>,
    pub seed: i64,
    /// Set only when the round-robin cursor advanced; the caller must
    /// persist this on `Schedule.last_variant_pos` in the same transaction
    /// that creates the job.
    pub new_last_variant_pos: Option<i32>,
}

/// `seed = SHA-256("{schedule_id}:{planned_at_utc_iso_second}")[0:8]` as a
/// big-endian i64. Normalizing to UTC, second precision, makes retries and
/// previews reproduce the same choice regardless of the caller's clock.
pub fn seed_for(schedule_id: crate::common::ScheduleId, planned_at: DateTime<Utc>) -> i64 {
    let key = format!(
        "{}:{}",
        schedule_id,
        planned_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let digest = Sha256::digest(key.as_bytes());
    i64::from_be_bytes(digest[0..8].try_into().unwrap())
}

pub async fn select(
    schedule: &Schedule,
    planned_at: DateTime<Utc>,
    db: &sqlx::PgPool,
) -> Result<Selection> {
    let seed = seed_for(schedule.id, planned_at);

    let Some(template_id) = schedule.template_id else {
        return Ok(Selection {
            variant_id: None,
            seed,
            new_last_variant_pos: None,
        });
    };

    let mut pool = PostVariant::active_pool(template_id, db).await?;
    if pool.is_empty() {
        return Ok(Selection {
            variant_id: None,
            seed: 0,
            new_last_variant_pos: None,
        });
    }

    if schedule.no_repeat_window > 0 {
        let recent = VariantSelectionHistory::recent_variant_ids(
            schedule.no_repeat_scope,
            template_id,
            schedule.id,
            planned_at,
            schedule.no_repeat_window as i64,
            db,
        )
        .await?;
        let filtered: Vec<PostVariant> = pool
            .iter()
            .filter(|v| !recent.contains(&v.id))
            .cloned()
            .collect();
        if !filtered.is_empty() {
            pool = filtered;
        }
    }

    let policy = schedule.selection_policy.unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed as u64);

    let (index, new_pos) = match policy {
        SelectionPolicy::RandomUniform | SelectionPolicy::NoRepeatWindow => {
            ((0..pool.len()).choose(&mut rng).unwrap(), None)
        }
        SelectionPolicy::RandomWeighted => {
            use rand::distributions::{Distribution, WeightedIndex};
            let weights: Vec<i32> = pool.iter().map(|v| v.weight.max(1)).collect();
            let dist = WeightedIndex::new(&weights).map_err(|e| {
                crate::error::SchedulerError::Validation(format!("invalid variant weights: {e}"))
            })?;
            (dist.sample(&mut rng), None)
        }
        SelectionPolicy::RoundRobin => {
            let n = pool.len() as i32;
            let next_pos = (schedule.last_variant_pos.unwrap_or(-1) + 1).rem_euclid(n);
            (next_pos as usize, Some(next_pos))
        }
    };

    Ok(Selection {
        variant_id: Some(pool[index].id),
        seed,
        new_last_variant_pos: new_pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_pure_function_of_schedule_and_second_precision_instant() {
        let schedule_id = crate::common::ScheduleId::new();
        let t = DateTime::parse_from_rfc3339("2030-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = seed_for(schedule_id, t);
        let b = seed_for(schedule_id, t);
        assert_eq!(a, b);
    }

    #[test]
    fn seed_truncates_sub_second_precision() {
        let schedule_id = crate::common::ScheduleId::new();
        let exact = DateTime::parse_from_rfc3339("2030-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let with_millis = DateTime::parse_from_rfc3339("2030-06-01T00:00:00.789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(seed_for(schedule_id, exact), seed_for(schedule_id, with_millis));
    }

    #[test]
    fn different_schedules_get_different_seeds() {
        let t = Utc::now();
        let a = seed_for(crate::common::ScheduleId::new(), t);
        let b = seed_for(crate::common::ScheduleId::new(), t);
        assert_ne!(a, b);
    }
}
