//! A single logical database: five typed keyspaces, each paired with its
//! own expiration map, plus lazy and periodic expiration.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;

use crate::types::{RedisHash, RedisList, RedisSet, RedisSortedSet};

/// One of the five value families a key can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    String,
    List,
    Hash,
    Set,
    SortedSet,
}

impl Family {
    /// Order `pexpire`/`expire` probe families in, and the snapshot codec's
    /// wire tag for each.
    pub const ALL: [Family; 5] = [
        Family::String,
        Family::List,
        Family::Hash,
        Family::Set,
        Family::SortedSet,
    ];

    pub fn tag(self) -> u8 {
        match self {
            Family::String => 0,
            Family::List => 1,
            Family::Hash => 2,
            Family::Set => 3,
            Family::SortedSet => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Family> {
        match tag {
            0 => Some(Family::String),
            1 => Some(Family::List),
            2 => Some(Family::Hash),
            3 => Some(Family::Set),
            4 => Some(Family::SortedSet),
            _ => None,
        }
    }
}

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as u64
}

#[derive(Debug, Default)]
pub struct Database {
    strings: HashMap<Vec<u8>, Vec<u8>>,
    strings_expire: HashMap<Vec<u8>, u64>,
    lists: HashMap<Vec<u8>, RedisList>,
    lists_expire: HashMap<Vec<u8>, u64>,
    hashes: HashMap<Vec<u8>, RedisHash>,
    hashes_expire: HashMap<Vec<u8>, u64>,
    sets: HashMap<Vec<u8>, RedisSet>,
    sets_expire: HashMap<Vec<u8>, u64>,
    sorted_sets: HashMap<Vec<u8>, RedisSortedSet>,
    sorted_sets_expire: HashMap<Vec<u8>, u64>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    fn is_expired_at(&self, family: Family, key: &[u8], now: u64) -> bool {
        let deadline = match family {
            Family::String => self.strings_expire.get(key),
            Family::List => self.lists_expire.get(key),
            Family::Hash => self.hashes_expire.get(key),
            Family::Set => self.sets_expire.get(key),
            Family::SortedSet => self.sorted_sets_expire.get(key),
        };
        matches!(deadline, Some(&d) if d < now)
    }

    pub fn is_expired(&self, family: Family, key: &[u8]) -> bool {
        self.is_expired_at(family, key, now_micros())
    }

    /// Delete `key` from every family's value and expire maps. The original
    /// program's delete only ever touched one family at a time and never
    /// covered SortedSet; here a single `del` always clears the key
    /// wherever it lives, since a key lives in at most one family at a
    /// time, without requiring the caller to know which.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let mut found = false;
        found |= self.strings.remove(key).is_some();
        self.strings_expire.remove(key);
        found |= self.lists.remove(key).is_some();
        self.lists_expire.remove(key);
        found |= self.hashes.remove(key).is_some();
        self.hashes_expire.remove(key);
        found |= self.sets.remove(key).is_some();
        self.sets_expire.remove(key);
        found |= self.sorted_sets.remove(key).is_some();
        self.sorted_sets_expire.remove(key);
        found
    }

    fn lazy_evict(&mut self, family: Family, key: &[u8]) -> bool {
        if self.is_expired(family, key) {
            match family {
                Family::String => {
                    self.strings.remove(key);
                    self.strings_expire.remove(key);
                }
                Family::List => {
                    self.lists.remove(key);
                    self.lists_expire.remove(key);
                }
                Family::Hash => {
                    self.hashes.remove(key);
                    self.hashes_expire.remove(key);
                }
                Family::Set => {
                    self.sets.remove(key);
                    self.sets_expire.remove(key);
                }
                Family::SortedSet => {
                    self.sorted_sets.remove(key);
                    self.sorted_sets_expire.remove(key);
                }
            }
            true
        } else {
            false
        }
    }

    pub fn set_expire(&mut self, family: Family, key: &[u8], deadline_micros: u64) -> bool {
        match family {
            Family::String if self.strings.contains_key(key) => {
                self.strings_expire.insert(key.to_vec(), deadline_micros);
                true
            }
            Family::List if self.lists.contains_key(key) => {
                self.lists_expire.insert(key.to_vec(), deadline_micros);
                true
            }
            Family::Hash if self.hashes.contains_key(key) => {
                self.hashes_expire.insert(key.to_vec(), deadline_micros);
                true
            }
            Family::Set if self.sets.contains_key(key) => {
                self.sets_expire.insert(key.to_vec(), deadline_micros);
                true
            }
            Family::SortedSet if self.sorted_sets.contains_key(key) => {
                self.sorted_sets_expire.insert(key.to_vec(), deadline_micros);
                true
            }
            _ => false,
        }
    }

    /// `pexpire`/`expire`: try families in a fixed order, first live key wins.
    pub fn pexpire_any_family(&mut self, key: &[u8], ttl_millis: i64) -> bool {
        let deadline = now_micros().saturating_add((ttl_millis as u64).saturating_mul(1000));
        for family in Family::ALL {
            self.lazy_evict(family, key);
            if self.set_expire(family, key, deadline) {
                return true;
            }
        }
        false
    }

    // ---- String ----

    pub fn set_string(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.strings_expire.remove(&key);
        self.strings.insert(key, value);
    }

    pub fn get_string(&mut self, key: &[u8]) -> Option<&Vec<u8>> {
        self.lazy_evict(Family::String, key);
        self.strings.get(key)
    }

    // ---- List ----

    pub fn rpush(&mut self, key: &[u8], values: Vec<Vec<u8>>) {
        self.lazy_evict(Family::List, key);
        let list = self.lists.entry(key.to_vec()).or_default();
        for v in values {
            list.rpush(v);
        }
    }

    pub fn rpop(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.lazy_evict(Family::List, key);
        self.lists.get_mut(key).and_then(|l| l.rpop())
    }

    // ---- Hash ----

    pub fn hset(&mut self, key: &[u8], field: Vec<u8>, value: Vec<u8>) {
        self.lazy_evict(Family::Hash, key);
        self.hashes.entry(key.to_vec()).or_default().set(field, value);
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
        self.lazy_evict(Family::Hash, key);
        self.hashes.get(key).and_then(|h| h.get(field)).cloned()
    }

    pub fn hgetall_rendered(&mut self, key: &[u8]) -> Option<String> {
        self.lazy_evict(Family::Hash, key);
        let hash = self.hashes.get(key)?;
        let mut out = String::new();
        for (field, value) in hash.iter() {
            out.push_str(&String::from_utf8_lossy(field));
            out.push(':');
            out.push_str(&String::from_utf8_lossy(value));
            out.push(' ');
        }
        Some(out)
    }

    // ---- Set ----

    pub fn sadd(&mut self, key: &[u8], member: Vec<u8>) {
        self.lazy_evict(Family::Set, key);
        self.sets.entry(key.to_vec()).or_default().add(member);
    }

    pub fn smembers_rendered(&mut self, key: &[u8]) -> Option<String> {
        self.lazy_evict(Family::Set, key);
        let set = self.sets.get(key)?;
        let mut out = String::new();
        for member in set.iter() {
            out.push_str(&String::from_utf8_lossy(member));
            out.push(' ');
        }
        Some(out)
    }

    // ---- SortedSet ----

    pub fn zadd(&mut self, key: &[u8], member: Vec<u8>, score: f64) {
        self.lazy_evict(Family::SortedSet, key);
        self.sorted_sets.entry(key.to_vec()).or_default().add(member, score);
    }

    pub fn zcard(&mut self, key: &[u8]) -> Option<usize> {
        self.lazy_evict(Family::SortedSet, key);
        self.sorted_sets.get(key).map(|z| z.len())
    }

    pub fn zcount(&mut self, key: &[u8], lo: f64, hi: f64) -> Option<usize> {
        self.lazy_evict(Family::SortedSet, key);
        self.sorted_sets.get(key).map(|z| z.count_in_range(lo, hi))
    }

    fn render_zset_members<'a>(members: impl Iterator<Item = (&'a [u8], f64)>) -> String {
        let lines: Vec<String> = members
            .map(|(m, s)| format!("{}:{}", String::from_utf8_lossy(m), s))
            .collect();
        lines.join("\n")
    }

    pub fn zrange_rendered(&mut self, key: &[u8], lo: f64, hi: f64) -> Option<String> {
        self.lazy_evict(Family::SortedSet, key);
        let zset = self.sorted_sets.get(key)?;
        let members = zset.range(lo, hi);
        if members.is_empty() {
            return None;
        }
        Some(Self::render_zset_members(members.into_iter()))
    }

    pub fn zgetall_rendered(&mut self, key: &[u8]) -> Option<String> {
        self.lazy_evict(Family::SortedSet, key);
        let zset = self.sorted_sets.get(key)?;
        Some(Self::render_zset_members(zset.iter_all().into_iter()))
    }

    // ---- sizes ----

    pub fn size_of(&self, family: Family) -> usize {
        match family {
            Family::String => self.strings.len(),
            Family::List => self.lists.len(),
            Family::Hash => self.hashes.len(),
            Family::Set => self.sets.len(),
            Family::SortedSet => self.sorted_sets.len(),
        }
    }

    pub fn size(&self) -> usize {
        Family::ALL.iter().map(|&f| self.size_of(f)).sum()
    }

    // ---- periodic sampling ----

    /// Sample up to `k` keys proportionally across the five families,
    /// evicting any that are expired. Returns the number evicted.
    pub fn sample_and_expire(&mut self, k: usize) -> usize {
        let total = self.size().max(1);
        let mut rng = rand::thread_rng();
        let mut evicted = 0;

        for family in Family::ALL {
            let family_len = self.size_of(family);
            if family_len == 0 {
                continue;
            }
            let share = (k * family_len / total).max(1).min(family_len);

            let keys: Vec<Vec<u8>> = match family {
                Family::String => self.strings.keys().cloned().collect(),
                Family::List => self.lists.keys().cloned().collect(),
                Family::Hash => self.hashes.keys().cloned().collect(),
                Family::Set => self.sets.keys().cloned().collect(),
                Family::SortedSet => self.sorted_sets.keys().cloned().collect(),
            };
            let sample: Vec<&Vec<u8>> = keys.choose_multiple(&mut rng, share).collect();
            for key in sample {
                if self.lazy_evict(family, key) {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Run sampling rounds, re-firing immediately whenever a round evicted
    /// more than half its sample.
    pub fn run_periodic_sampling(&mut self, k: usize) {
        loop {
            let evicted = self.sample_and_expire(k);
            if evicted <= k / 2 {
                break;
            }
        }
    }

    // ---- snapshot load/save support ----

    pub fn insert_raw(&mut self, family: Family, key: Vec<u8>, payload: RawPayload) {
        match (family, payload) {
            (Family::String, RawPayload::String(v)) => {
                self.strings.insert(key, v);
            }
            (Family::List, RawPayload::List(items)) => {
                let list = self.lists.entry(key).or_default();
                for item in items {
                    list.rpush(item);
                }
            }
            (Family::Hash, RawPayload::Hash(fields)) => {
                let hash = self.hashes.entry(key).or_default();
                for (field, value) in fields {
                    hash.set(field, value);
                }
            }
            (Family::Set, RawPayload::Set(members)) => {
                let set = self.sets.entry(key).or_default();
                for member in members {
                    set.add(member);
                }
            }
            (Family::SortedSet, RawPayload::SortedSet(members)) => {
                let zset = self.sorted_sets.entry(key).or_default();
                for (member, score) in members {
                    zset.add(member, score);
                }
            }
            _ => unreachable!("payload family must match the target family"),
        }
    }

    pub fn iter_family<'a>(&'a self, family: Family) -> Box<dyn Iterator<Item = Vec<u8>> + 'a> {
        match family {
            Family::String => Box::new(self.strings.keys().cloned()),
            Family::List => Box::new(self.lists.keys().cloned()),
            Family::Hash => Box::new(self.hashes.keys().cloned()),
            Family::Set => Box::new(self.sets.keys().cloned()),
            Family::SortedSet => Box::new(self.sorted_sets.keys().cloned()),
        }
    }

    pub fn expire_of(&self, family: Family, key: &[u8]) -> u64 {
        let map = match family {
            Family::String => &self.strings_expire,
            Family::List => &self.lists_expire,
            Family::Hash => &self.hashes_expire,
            Family::Set => &self.sets_expire,
            Family::SortedSet => &self.sorted_sets_expire,
        };
        map.get(key).copied().unwrap_or(0)
    }

    pub fn string_value(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.strings.get(key)
    }

    pub fn list_values(&self, key: &[u8]) -> Option<Vec<&Vec<u8>>> {
        self.lists.get(key).map(|l| l.iter().collect())
    }

    pub fn hash_entries(&self, key: &[u8]) -> Option<Vec<(&Vec<u8>, &Vec<u8>)>> {
        self.hashes.get(key).map(|h| h.iter().collect())
    }

    pub fn set_members(&self, key: &[u8]) -> Option<Vec<&Vec<u8>>> {
        self.sets.get(key).map(|s| s.iter().collect())
    }

    pub fn sorted_set_members(&self, key: &[u8]) -> Option<Vec<(&[u8], f64)>> {
        self.sorted_sets.get(key).map(|z| z.iter_all())
    }
}

pub enum RawPayload {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    Set(Vec<Vec<u8>>),
    SortedSet(Vec<(Vec<u8>, f64)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_eviction_drops_expired_string() {
        let mut db = Database::new();
        db.set_string(b"k".to_vec(), b"v".to_vec());
        db.set_expire(Family::String, b"k", 1); // already in the past
        assert_eq!(db.get_string(b"k"), None);
        assert_eq!(db.size_of(Family::String), 0);
    }

    #[test]
    fn del_clears_every_family() {
        let mut db = Database::new();
        db.zadd(b"k", b"m".to_vec(), 1.0);
        assert!(db.del(b"k"));
        assert_eq!(db.zcard(b"k"), None);
    }

    #[test]
    fn pexpire_prefers_first_matching_family() {
        let mut db = Database::new();
        db.rpush(b"k", vec![b"v".to_vec()]);
        assert!(db.pexpire_any_family(b"k", 10_000));
        assert_eq!(db.expire_of(Family::List, b"k") > 0, true);
    }

    #[test]
    fn hgetall_rendering_is_sorted_and_space_terminated() {
        let mut db = Database::new();
        db.hset(b"h", b"b".to_vec(), b"2".to_vec());
        db.hset(b"h", b"a".to_vec(), b"1".to_vec());
        assert_eq!(db.hgetall_rendered(b"h").unwrap(), "a:1 b:2 ");
    }

    #[test]
    fn zrange_rendering_is_ascending_and_newline_joined() {
        let mut db = Database::new();
        db.zadd(b"z", b"x".to_vec(), 2.0);
        db.zadd(b"z", b"y".to_vec(), 1.0);
        assert_eq!(db.zgetall_rendered(b"z").unwrap(), "y:1\nx:2");
    }

    #[test]
    fn zrange_with_no_members_in_range_is_none() {
        let mut db = Database::new();
        db.zadd(b"z", b"x".to_vec(), 2.0);
        assert_eq!(db.zrange_rendered(b"z", 100.0, 200.0), None);
    }

    #[test]
    fn rpop_on_empty_or_missing_list_is_none() {
        let mut db = Database::new();
        assert_eq!(db.rpop(b"nosuchlist"), None);
        db.rpush(b"q", vec![b"only".to_vec()]);
        db.rpop(b"q");
        assert_eq!(db.rpop(b"q"), None);
    }
}
