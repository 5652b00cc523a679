//! Process-local LRU of compiled `RRuleSet`s, keyed by schedule id + a hash
//! of the spec and DTSTART. Safe to drop at process restart; never
//! persisted.

use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::common::ScheduleId;

pub struct RRuleCache {
    inner: Mutex<lru::LruCache<String, rrule::RRuleSet>>,
}

impl RRuleCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    fn key(schedule_id: ScheduleId, rrule_line: &str, dtstart_line: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(rrule_line.as_bytes());
        hasher.update(dtstart_line.as_bytes());
        let digest = hasher.finalize();
        format!("{}:{}", schedule_id, hex::encode(digest))
    }

    /// Returns the cached set if present, else parses `full_text` (a
    /// `DTSTART:...\nRRULE:...` blob), caches, and returns it.
    pub fn get_or_parse(
        &self,
        schedule_id: ScheduleId,
        rrule_line: &str,
        dtstart_line: &str,
        full_text: &str,
    ) -> Result<rrule::RRuleSet, rrule::RRuleError> {
        let key = Self::key(schedule_id, rrule_line, dtstart_line);
        let mut cache = self.inner.lock().unwrap();
        if let Some(set) = cache.get(&key) {
            return Ok(set.clone());
        }
        let set: rrule::RRuleSet = full_text.parse()?;
        cache.put(key, set.clone());
        Ok(set)
    }
}

impl Default for RRuleCache {
    fn default() -> Self {
        Self::new(1000)
    }
}
