//! In-process coordination store.
//!
//! Holds the node's volatile coordination state: broadcast scheduling keys,
//! inbound work queues, claim-check cache, callback registrations, the
//! anti-replay cache and rate-limit windows. The API mirrors the small set of
//! string/set/sorted-set/hash/queue operations the subsystems need; multi-key
//! updates that must be observed atomically go through [`CoordStore::pipeline`],
//! which holds the single inner lock for the duration of the closure-free
//! guard. One writer at a time is exactly the serializability the broadcast
//! state machine requires.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    expiries: HashMap<String, Instant>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, HashMap<String, u64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    queues: HashMap<String, VecDeque<String>>,
}

impl Inner {
    fn drop_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.strings.remove(key);
            }
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.drop_if_expired(key);
        self.strings.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.expiries.remove(key);
        self.strings.insert(key.to_string(), value.to_string());
    }

    fn del(&mut self, key: &str) {
        self.strings.remove(key);
        self.expiries.remove(key);
        self.sets.remove(key);
        self.zsets.remove(key);
        self.hashes.remove(key);
        self.queues.remove(key);
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string())
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        self.sets
            .get_mut(key)
            .map(|s| s.remove(member))
            .unwrap_or(false)
    }

    fn zadd(&mut self, key: &str, member: &str, score: u64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.zsets
            .get_mut(key)
            .map(|z| z.remove(member).is_some())
            .unwrap_or(false)
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn hdel(&mut self, key: &str, field: &str) -> bool {
        self.hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct CoordStore {
    inner: Mutex<Inner>,
}

impl CoordStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- strings ---

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key)
    }

    pub fn set(&self, key: &str, value: &str) {
        self.inner.lock().set(key, value)
    }

    /// Set with a time-to-live; used by the anti-replay cache.
    pub fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiries.insert(key.to_string(), Instant::now() + ttl);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.inner.lock().get(key).is_some()
    }

    pub fn del(&self, key: &str) {
        self.inner.lock().del(key)
    }

    // --- sets ---

    pub fn sadd(&self, key: &str, member: &str) -> bool {
        self.inner.lock().sadd(key, member)
    }

    pub fn srem(&self, key: &str, member: &str) -> bool {
        self.inner.lock().srem(key, member)
    }

    pub fn smembers(&self, key: &str) -> HashSet<String> {
        self.inner.lock().sets.get(key).cloned().unwrap_or_default()
    }

    pub fn scard(&self, key: &str) -> usize {
        self.inner.lock().sets.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Add a member and report the resulting cardinality in one step.
    pub fn sadd_card(&self, key: &str, member: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.sadd(key, member);
        inner.sets.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Pop an arbitrary member, if any.
    pub fn spop(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let set = inner.sets.get_mut(key)?;
        let member = set.iter().next()?.clone();
        set.remove(&member);
        Some(member)
    }

    // --- sorted sets ---

    pub fn zadd(&self, key: &str, member: &str, score: u64) {
        self.inner.lock().zadd(key, member, score)
    }

    pub fn zrem(&self, key: &str, member: &str) -> bool {
        self.inner.lock().zrem(key, member)
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<u64> {
        self.inner.lock().zsets.get(key)?.get(member).copied()
    }

    /// Members with `min <= score <= max`, ascending by score, at most
    /// `limit`. Mirrors ZRANGEBYSCORE ... WITHSCORES LIMIT 0 n.
    pub fn zrange_by_score(
        &self,
        key: &str,
        min: u64,
        max: u64,
        limit: usize,
    ) -> Vec<(String, u64)> {
        let inner = self.inner.lock();
        let Some(zset) = inner.zsets.get(key) else {
            return Vec::new();
        };
        let mut members: Vec<(String, u64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members.truncate(limit);
        members
    }

    pub fn zcount(&self, key: &str, min: u64, max: u64) -> usize {
        let inner = self.inner.lock();
        inner
            .zsets
            .get(key)
            .map(|z| z.values().filter(|s| **s >= min && **s <= max).count())
            .unwrap_or(0)
    }

    pub fn zrem_range_by_score(&self, key: &str, min: u64, max: u64) {
        let mut inner = self.inner.lock();
        if let Some(zset) = inner.zsets.get_mut(key) {
            zset.retain(|_, score| *score < min || *score > max);
        }
    }

    // --- hashes ---

    pub fn hset(&self, key: &str, field: &str, value: &str) {
        self.inner.lock().hset(key, field, value)
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.inner.lock().hashes.get(key)?.get(field).cloned()
    }

    pub fn hdel(&self, key: &str, field: &str) -> bool {
        self.inner.lock().hdel(key, field)
    }

    pub fn hlen(&self, key: &str) -> usize {
        self.inner.lock().hashes.get(key).map(|h| h.len()).unwrap_or(0)
    }

    // --- queues ---

    pub fn queue_push(&self, key: &str, item: &str) {
        self.inner
            .lock()
            .queues
            .entry(key.to_string())
            .or_default()
            .push_back(item.to_string());
    }

    pub fn queue_pop(&self, key: &str) -> Option<String> {
        self.inner.lock().queues.get_mut(key)?.pop_front()
    }

    /// Atomically move the head of `src` to the tail of `dst`. This is the
    /// crash-recovery primitive: work moves to a processing queue before it
    /// is acted on, and is cleared only after durable writes complete.
    pub fn queue_pop_to(&self, src: &str, dst: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let item = inner.queues.get_mut(src)?.pop_front()?;
        inner
            .queues
            .entry(dst.to_string())
            .or_default()
            .push_back(item.clone());
        Some(item)
    }

    pub fn queue_items(&self, key: &str) -> Vec<String> {
        self.inner
            .lock()
            .queues
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue_len(&self, key: &str) -> usize {
        self.inner.lock().queues.get(key).map(|q| q.len()).unwrap_or(0)
    }

    pub fn queue_clear(&self, key: &str) {
        if let Some(q) = self.inner.lock().queues.get_mut(key) {
            q.clear();
        }
    }

    // --- multi ---

    /// Begin an atomic multi-key update. All mutations issued through the
    /// returned pipeline are observed together by every other caller.
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            inner: self.inner.lock(),
        }
    }
}

/// Guard over the store's lock exposing the mutating subset of operations.
pub struct Pipeline<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl Pipeline<'_> {
    pub fn set(&mut self, key: &str, value: &str) {
        self.inner.set(key, value)
    }

    pub fn del(&mut self, key: &str) {
        self.inner.del(key)
    }

    pub fn sadd(&mut self, key: &str, member: &str) -> bool {
        self.inner.sadd(key, member)
    }

    pub fn srem(&mut self, key: &str, member: &str) -> bool {
        self.inner.srem(key, member)
    }

    pub fn zadd(&mut self, key: &str, member: &str, score: u64) {
        self.inner.zadd(key, member, score)
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.inner.zrem(key, member)
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.inner.hset(key, field, value)
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> bool {
        self.inner.hdel(key, field)
    }
}
