//! `resolve(schedule) -> next fire instant | none`.
//!
//! All instants are stored and compared as UTC; wall-clock interpretation
//! happens only through the schedule's IANA zone, via `chrono_tz`.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use super::models::ScheduleKind;
use super::rrule_cache::RRuleCache;
use super::Schedule;

const RRULE_WHITELIST: &[&str] = &[
    "FREQ", "INTERVAL", "COUNT", "UNTIL", "BYDAY", "BYMONTHDAY", "BYMONTH", "BYYEARDAY",
    "BYWEEKNO", "BYSETPOS", "BYHOUR", "BYMINUTE", "BYSECOND", "DTSTART", "RRULE",
];

const MAX_RRULE_SPEC_BYTES: usize = 4096;

/// Resolves a schedule's next UTC fire instant against `now`. Returns `None`
/// when the schedule is exhausted (one-shot in the past, RRULE COUNT/UNTIL
/// reached) or the spec fails validation; either way the caller disables
/// the schedule.
pub fn resolve(schedule: &Schedule, now: DateTime<Utc>, cache: &RRuleCache) -> Option<DateTime<Utc>> {
    let tz: Tz = schedule.timezone.parse().ok().unwrap_or(chrono_tz::UTC);

    match schedule.kind {
        ScheduleKind::OneShot => resolve_one_shot(&schedule.schedule_spec, now),
        ScheduleKind::Cron => resolve_cron(&schedule.schedule_spec, tz, schedule.last_run_at, now),
        ScheduleKind::Rrule => resolve_rrule(schedule, tz, now, cache),
    }
}

fn resolve_one_shot(spec: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let instant = DateTime::parse_from_rfc3339(spec).ok()?.with_timezone(&Utc);
    if instant > now {
        Some(instant)
    } else {
        None
    }
}

/// Whether the cron hour field is the literal `3` (the case requiring the
/// pinned-reference special casing in §4.1). Ranges/lists that merely
/// include 3 are not handled by this check; the original Python source only
/// ever schedules single-hour crons for its own posting cadence.
fn hour_field_is_three(spec: &str) -> bool {
    spec.split_whitespace()
        .nth(1)
        .map(|h| h == "3")
        .unwrap_or(false)
}

fn local_at(tz: Tz, date: NaiveDate, h: u32, m: u32, s: u32) -> Option<DateTime<Tz>> {
    let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(h, m, s)?);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        chrono::LocalResult::None => None,
    }
}

fn resolve_cron(
    spec: &str,
    tz: Tz,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let schedule = cron::Schedule::from_str(spec).ok()?;
    let reference_is_now = last_run_at.is_none();
    let reference_utc = last_run_at.unwrap_or(now);
    let reference_local = reference_utc.with_timezone(&tz);

    let mut candidate = schedule.after(&reference_local).next()?;

    if reference_is_now {
        let before_offset = reference_local.offset().fix();
        let after_offset = candidate.offset().fix();
        if before_offset != after_offset {
            let transition_day = candidate.date_naive();
            let spring_forward = after_offset.local_minus_utc() > before_offset.local_minus_utc();

            let pinned = if hour_field_is_three(spec) {
                if spring_forward {
                    local_at(tz, transition_day, 1, 59, 59)
                } else {
                    local_at(tz, transition_day, 2, 59, 59)
                }
            } else {
                local_at(tz, transition_day, 3, 0, 0)
            };

            if let Some(pinned) = pinned {
                candidate = schedule.after(&pinned).next()?;
            }
        }
    }

    Some(candidate.with_timezone(&Utc))
}

fn validate_rrule_spec(rrule_line: &str) -> Option<()> {
    if rrule_line.len() > MAX_RRULE_SPEC_BYTES {
        return None;
    }
    for component in rrule_line.split(';') {
        let key = component.split('=').next()?.trim().to_ascii_uppercase();
        if key.is_empty() {
            continue;
        }
        if !RRULE_WHITELIST.contains(&key.as_str()) {
            return None;
        }
    }
    Some(())
}

fn resolve_rrule(
    schedule: &Schedule,
    tz: Tz,
    now: DateTime<Utc>,
    cache: &RRuleCache,
) -> Option<DateTime<Utc>> {
    validate_rrule_spec(&schedule.schedule_spec)?;

    let dtstart = derive_dtstart(&schedule.schedule_spec, tz, schedule.created_at, now)?;
    let dtstart_line = format!("DTSTART;TZID={}:{}", schedule.timezone, dtstart.format("%Y%m%dT%H%M%S"));
    let full_text = format!("{}\nRRULE:{}", dtstart_line, schedule.schedule_spec);

    let set = cache
        .get_or_parse(schedule.id, &schedule.schedule_spec, &dtstart_line, &full_text)
        .ok()?;

    let reference_is_now = schedule.last_run_at.is_none();
    let reference_utc = schedule.last_run_at.unwrap_or(now);
    let reference_rrule_tz = reference_utc.with_timezone(&rrule::Tz::UTC);

    let mut occurrences = set.after(reference_rrule_tz).all(1);
    if reference_is_now && occurrences.dates.is_empty() {
        // No DST-gap retry needed: rrule resolves ambiguous/nonexistent wall
        // times at the RRuleSet level via its own DTSTART handling.
    }
    let first = occurrences.dates.pop()?;
    Some(first.with_timezone(&Utc))
}

/// If the spec names BYHOUR/BYMINUTE/BYSECOND, snap DTSTART to that wall
/// time on the schedule's creation date in the schedule zone; otherwise use
/// creation time verbatim.
fn derive_dtstart(
    rrule_line: &str,
    tz: Tz,
    created_at: DateTime<Utc>,
    _now: DateTime<Utc>,
) -> Option<DateTime<Tz>> {
    let mut hour = None;
    let mut minute = None;
    let mut second = None;
    for component in rrule_line.split(';') {
        let mut parts = component.splitn(2, '=');
        let key = parts.next()?.trim().to_ascii_uppercase();
        let value = parts.next().unwrap_or("").trim();
        match key.as_str() {
            "BYHOUR" => hour = value.split(',').next().and_then(|v| v.parse::<u32>().ok()),
            "BYMINUTE" => minute = value.split(',').next().and_then(|v| v.parse::<u32>().ok()),
            "BYSECOND" => second = value.split(',').next().and_then(|v| v.parse::<u32>().ok()),
            _ => {}
        }
    }

    let created_local = created_at.with_timezone(&tz);
    if hour.is_none() && minute.is_none() && second.is_none() {
        return Some(created_local);
    }

    local_at(
        tz,
        created_local.date_naive(),
        hour.unwrap_or(0),
        minute.unwrap_or(0),
        second.unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PostId;

    fn base_schedule(kind: ScheduleKind, spec: &str, tz: &str) -> Schedule {
        Schedule::builder()
            .post_id(PostId::new())
            .kind(kind)
            .schedule_spec(spec)
            .timezone(tz)
            .build()
    }

    #[test]
    fn one_shot_exactly_now_is_not_future() {
        let now = Utc::now();
        let spec = now.to_rfc3339();
        assert_eq!(resolve_one_shot(&spec, now), None);
    }

    #[test]
    fn one_shot_future_resolves() {
        let now = Utc::now();
        let future = now + chrono::Duration::days(1);
        let resolved = resolve_one_shot(&future.to_rfc3339(), now).unwrap();
        assert_eq!(resolved.timestamp(), future.timestamp());
    }

    #[test]
    fn cron_next_fire_is_strictly_after_last_run() {
        let tz = chrono_tz::America::Chicago;
        let last_run = Utc.with_ymd_and_hms(2030, 1, 1, 13, 12, 0).unwrap();
        let next = resolve_cron("12 7 * * *", tz, Some(last_run), Utc::now()).unwrap();
        assert!(next > last_run);
    }

    #[test]
    fn rrule_whitelist_rejects_unknown_components() {
        assert!(validate_rrule_spec("FREQ=DAILY;FOO=BAR").is_none());
        assert!(validate_rrule_spec("FREQ=DAILY;BYHOUR=9").is_some());
    }

    #[test]
    fn rrule_spec_too_large_is_rejected() {
        let huge = format!("FREQ=DAILY;X={}", "A".repeat(MAX_RRULE_SPEC_BYTES));
        assert!(validate_rrule_spec(&huge).is_none());
    }

    #[test]
    fn hour_field_three_detection() {
        assert!(hour_field_is_three("0 3 * * *"));
        assert!(!hour_field_is_three("30 1 * * *"));
    }

    #[test]
    fn schedule_with_unparseable_spec_returns_none() {
        let s = base_schedule(ScheduleKind::Cron, "not a cron expression", "UTC");
        let cache = RRuleCache::default();
        assert!(resolve(&s, Utc::now(), &cache).is_none());
    }

    // America/Chicago DST transitions for 2030: spring-forward on March 10
    // (2:00 CST -> 3:00 CDT), fall-back on November 3 (2:00 CDT -> 1:00 CST).

    #[test]
    fn cron_hour_three_not_skipped_across_spring_forward() {
        let tz = chrono_tz::America::Chicago;
        let now = Utc.with_ymd_and_hms(2030, 3, 9, 12, 0, 0).unwrap();
        let next = resolve_cron("0 3 * * *", tz, None, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 3, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn cron_hour_three_not_skipped_across_fall_back() {
        let tz = chrono_tz::America::Chicago;
        let now = Utc.with_ymd_and_hms(2030, 11, 2, 12, 0, 0).unwrap();
        let next = resolve_cron("0 3 * * *", tz, None, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 11, 3, 9, 0, 0).unwrap());
    }

    #[test]
    fn cron_non_three_hour_pins_to_three_am_across_spring_forward() {
        let tz = chrono_tz::America::Chicago;
        let now = Utc.with_ymd_and_hms(2030, 3, 9, 12, 0, 0).unwrap();
        let next = resolve_cron("0 4 * * *", tz, None, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn cron_non_three_hour_pins_to_three_am_across_fall_back() {
        let tz = chrono_tz::America::Chicago;
        let now = Utc.with_ymd_and_hms(2030, 11, 2, 12, 0, 0).unwrap();
        let next = resolve_cron("0 4 * * *", tz, None, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 11, 3, 10, 0, 0).unwrap());
    }
}
