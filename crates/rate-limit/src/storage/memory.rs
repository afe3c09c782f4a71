//! In-memory rate limit storage for a single process.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{RateLimitStorage, ScoreBound, StorageError, TTL_MISSING, TTL_NO_EXPIRY};
use crate::clock::{Clock, SystemClock};

/// In-memory rate limit storage implementation.
///
/// Every operation holds the shard lock of its key for its whole duration, which makes each
/// operation atomic against concurrent callers. Expired keys are dropped lazily when touched, or
/// eagerly through [`InMemoryStorage::purge_expired`].
pub struct InMemoryStorage {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new in-memory storage instance driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Remove every expired key, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.slots.len();

        self.slots.retain(|_, slot| !slot.is_expired(now));

        let purged = before.saturating_sub(self.slots.len());

        if purged > 0 {
            log::debug!("Purged {purged} expired rate limit keys");
        }

        purged
    }

    /// Number of keys currently held, including expired keys not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no keys are held.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&Slot) -> T) -> Option<T> {
        let now = self.clock.now_millis();

        {
            let slot = self.slots.get(key)?;

            if !slot.is_expired(now) {
                return Some(f(slot.value()));
            }
        }

        self.slots.remove_if(key, |_, slot| slot.is_expired(now));

        None
    }

    fn write<T>(&self, key: &str, f: impl FnOnce(&mut Slot) -> T) -> Option<T> {
        let now = self.clock.now_millis();

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                None
            }
            Entry::Occupied(mut entry) => Some(f(entry.get_mut())),
            Entry::Vacant(_) => None,
        }
    }

    fn upsert<T>(
        &self,
        key: &str,
        init: impl Fn() -> Value,
        f: impl FnOnce(&mut Slot) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let now = self.clock.now_millis();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot::new(init()));

        if slot.is_expired(now) {
            *slot = Slot::new(init());
        }

        f(slot.value_mut())
    }

    fn add(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        self.upsert(
            key,
            || Value::String("0".to_string()),
            |slot| {
                let Value::String(value) = &mut slot.value else {
                    return Err(wrong_type(key));
                };

                let current = value
                    .parse::<i64>()
                    .map_err(|_| StorageError::Query(format!("value at '{key}' is not an integer")))?;

                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| StorageError::Query(format!("increment at '{key}' would overflow")))?;

                *value = next.to_string();

                Ok(next)
            },
        )
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStorage for InMemoryStorage {
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        self.add(key, amount)
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        let amount = amount
            .checked_neg()
            .ok_or_else(|| StorageError::Query(format!("decrement at '{key}' would overflow")))?;

        self.add(key, amount)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.read(key, |slot| slot.value.clone()) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(Value::SortedSet(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, StorageError> {
        let mut slot = Slot::new(Value::String(value.to_string()));

        if ttl_seconds > 0 {
            slot.expires_at = Some(expiry(self.clock.now_millis(), ttl_seconds));
        }

        self.slots.insert(key.to_string(), slot);

        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = self.clock.now_millis();

        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError> {
        if seconds == 0 {
            return self.delete(key).await;
        }

        let expires_at = expiry(self.clock.now_millis(), seconds);

        Ok(self.write(key, |slot| slot.expires_at = Some(expires_at)).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        let now = self.clock.now_millis();

        let ttl = self.read(key, |slot| match slot.expires_at {
            None => TTL_NO_EXPIRY,
            Some(expires_at) => expires_at.saturating_sub(now).div_ceil(1000) as i64,
        });

        Ok(ttl.unwrap_or(TTL_MISSING))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.read(key, |_| ()).is_some())
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<bool, StorageError> {
        if let Some((member, _)) = members.iter().find(|(_, score)| score.is_nan()) {
            return Err(StorageError::Query(format!("score of member '{member}' is not a number")));
        }

        self.upsert(
            key,
            || Value::SortedSet(SortedSet::default()),
            |slot| {
                let Value::SortedSet(set) = &mut slot.value else {
                    return Err(wrong_type(key));
                };

                let mut added = false;

                for (member, score) in members {
                    added |= set.insert(member, *score);
                }

                Ok(added)
            },
        )
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64, StorageError> {
        let outcome = self.write(key, |slot| match &mut slot.value {
            Value::SortedSet(set) => Ok((set.remove_range(min, max), set.is_empty())),
            Value::String(_) => Err(wrong_type(key)),
        });

        let Some((removed, now_empty)) = outcome.transpose()? else {
            return Ok(0);
        };

        if now_empty {
            self.slots
                .remove_if(key, |_, slot| matches!(&slot.value, Value::SortedSet(set) if set.is_empty()));
        }

        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StorageError> {
        let len = self.read(key, |slot| match &slot.value {
            Value::SortedSet(set) => Ok(set.len() as u64),
            Value::String(_) => Err(wrong_type(key)),
        });

        Ok(len.transpose()?.unwrap_or(0))
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        let members = self.read(key, |slot| match &slot.value {
            Value::SortedSet(set) => Ok(set.range_by_rank(start, stop)),
            Value::String(_) => Err(wrong_type(key)),
        });

        Ok(members.transpose()?.unwrap_or_default())
    }
}

/// Unix millis `seconds` after `now`, saturating for windows too long to represent.
fn expiry(now: u64, seconds: u64) -> u64 {
    now.saturating_add(seconds.saturating_mul(1000))
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::WrongType { key: key.to_string() }
}

struct Slot {
    value: Value,
    expires_at: Option<u64>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Clone)]
enum Value {
    String(String),
    SortedSet(SortedSet),
}

/// Members ordered by score, ties broken by member like Redis does.
#[derive(Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(previous) => {
                self.ordered.remove(&(Score(previous), member.to_string()));
                self.ordered.insert((Score(score), member.to_string()));
                false
            }
            None => {
                self.ordered.insert((Score(score), member.to_string()));
                true
            }
        }
    }

    fn remove_range(&mut self, min: ScoreBound, max: ScoreBound) -> u64 {
        let doomed: Vec<(Score, String)> = self
            .ordered
            .iter()
            .skip_while(|(score, _)| !min.admits_from_below(score.0))
            .take_while(|(score, _)| max.admits_from_above(score.0))
            .cloned()
            .collect();

        for entry in &doomed {
            self.ordered.remove(entry);
            self.scores.remove(&entry.1);
        }

        doomed.len() as u64
    }

    fn range_by_rank(&self, start: i64, stop: i64) -> Vec<String> {
        let len = self.ordered.len() as i64;

        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

        if len == 0 || start > stop || start >= len {
            return Vec::new();
        }

        self.ordered
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
