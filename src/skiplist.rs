//! Score-ordered index backing the SortedSet family.
//!
//! A Pugh-style probabilistic skip list: each node carries a `(member,
//! score)` pair and a forward pointer per level it participates in, up to
//! [`MAX_LEVEL`]. A sentinel header holds the top-level entry points.
//!
//! The original source links nodes with raw pointers; this is pure safe
//! Rust, so nodes live in an arena (`Vec<Option<Node>>`) addressed by
//! `usize` index, with freed slots recycled through a free list instead of
//! requiring a pointer-fixup pass on delete.

use rand::Rng;
use std::cmp::Ordering;

pub const MAX_LEVEL: usize = 12;
const BRANCHING: u32 = 4;

#[derive(Debug)]
struct Node {
    member: Vec<u8>,
    score: f64,
    forward: Vec<Option<usize>>,
}

/// A location a forward pointer can be read from or written to: either the
/// header sentinel or a live arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loc {
    Head,
    Node(usize),
}

/// An inclusive-by-default score range for [`SkipList::nodes_in_range`] and
/// [`SkipList::count_in_range`].
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl RangeSpec {
    /// An inclusive range `[min, max]`.
    pub fn inclusive(min: f64, max: f64) -> Self {
        RangeSpec {
            min,
            max,
            min_exclusive: false,
            max_exclusive: false,
        }
    }
}

/// True iff `(a_score, a_member)` sorts strictly before `(b_score, b_member)`.
/// Equal scores fall back to member byte comparison: ties in score compare
/// members lexicographically.
fn less(a_score: f64, a_member: &[u8], b_score: f64, b_member: &[u8]) -> bool {
    match a_score.partial_cmp(&b_score) {
        Some(Ordering::Less) => true,
        Some(Ordering::Equal) => a_member < b_member,
        _ => false,
    }
}

#[derive(Debug)]
pub struct SkipList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Vec<Option<usize>>,
    level: usize,
    length: usize,
    /// member -> score, used to dedupe on insert and to answer point lookups
    /// without a traversal.
    index: std::collections::HashMap<Vec<u8>, f64>,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    pub fn new() -> Self {
        SkipList {
            nodes: Vec::new(),
            free: Vec::new(),
            head: vec![None; MAX_LEVEL],
            level: 1,
            length: 0,
            index: std::collections::HashMap::new(),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn score_of(&self, member: &[u8]) -> Option<f64> {
        self.index.get(member).copied()
    }

    fn forward_at(&self, loc: Loc, level: usize) -> Option<usize> {
        match loc {
            Loc::Head => self.head[level],
            Loc::Node(i) => self.nodes[i].as_ref().unwrap().forward[level],
        }
    }

    fn set_forward_at(&mut self, loc: Loc, level: usize, target: Option<usize>) {
        match loc {
            Loc::Head => self.head[level] = target,
            Loc::Node(i) => self.nodes[i].as_mut().unwrap().forward[level] = target,
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(i) = self.free.pop() {
            self.nodes[i] = Some(node);
            i
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_ratio(1, BRANCHING) {
            level += 1;
        }
        level
    }

    /// Insert or update `member` with `score`. If `member` is already
    /// present, the prior entry is deleted first — member identity is
    /// unique.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) {
        if let Some(&old_score) = self.index.get(member.as_slice()) {
            self.delete(&member, old_score);
        }
        self.index.insert(member.clone(), score);

        let mut update = [Loc::Head; MAX_LEVEL];
        let mut cur = Loc::Head;
        for i in (0..self.level).rev() {
            while let Some(idx) = self.forward_at(cur, i) {
                let node = self.nodes[idx].as_ref().unwrap();
                if less(node.score, &node.member, score, &member) {
                    cur = Loc::Node(idx);
                } else {
                    break;
                }
            }
            update[i] = cur;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for slot in update.iter_mut().take(new_level).skip(self.level) {
                *slot = Loc::Head;
            }
            self.level = new_level;
        }

        let node = Node {
            member,
            score,
            forward: vec![None; new_level],
        };
        let idx = self.alloc(node);
        for (i, slot) in update.iter().enumerate().take(new_level) {
            let next = self.forward_at(*slot, i);
            self.set_forward_at(Loc::Node(idx), i, next);
            self.set_forward_at(*slot, i, Some(idx));
        }
        self.length += 1;
    }

    /// Remove `(member, score)`. Returns whether it was present.
    pub fn delete(&mut self, member: &[u8], score: f64) -> bool {
        let mut update = [Loc::Head; MAX_LEVEL];
        let mut cur = Loc::Head;
        for i in (0..self.level).rev() {
            while let Some(idx) = self.forward_at(cur, i) {
                let node = self.nodes[idx].as_ref().unwrap();
                if less(node.score, &node.member, score, member) {
                    cur = Loc::Node(idx);
                } else {
                    break;
                }
            }
            update[i] = cur;
        }

        let Some(idx) = self.forward_at(cur, 0) else {
            return false;
        };
        let node_matches = {
            let node = self.nodes[idx].as_ref().unwrap();
            node.score == score && node.member == member
        };
        if !node_matches {
            return false;
        }

        let node_level = self.nodes[idx].as_ref().unwrap().forward.len();
        for (i, slot) in update.iter().enumerate().take(node_level) {
            if self.forward_at(*slot, i) == Some(idx) {
                let next = self.forward_at(Loc::Node(idx), i);
                self.set_forward_at(*slot, i, next);
            }
        }

        self.nodes[idx] = None;
        self.free.push(idx);
        self.index.remove(member);

        while self.level > 1 && self.head[self.level - 1].is_none() {
            self.level -= 1;
        }
        self.length -= 1;
        true
    }

    /// Find the first node's arena index at or past `spec.min`, starting the
    /// level-0 walk from there.
    fn first_past_min(&self, spec: &RangeSpec) -> Option<usize> {
        let mut cur = Loc::Head;
        for i in (0..self.level).rev() {
            while let Some(idx) = self.forward_at(cur, i) {
                let node = self.nodes[idx].as_ref().unwrap();
                let before_min = if spec.min_exclusive {
                    node.score <= spec.min
                } else {
                    node.score < spec.min
                };
                if before_min {
                    cur = Loc::Node(idx);
                } else {
                    break;
                }
            }
        }
        self.forward_at(cur, 0)
    }

    fn within_max(&self, node: &Node, spec: &RangeSpec) -> bool {
        if spec.max_exclusive {
            node.score < spec.max
        } else {
            node.score <= spec.max
        }
    }

    pub fn count_in_range(&self, spec: &RangeSpec) -> usize {
        let mut count = 0;
        let mut cur = self.first_past_min(spec);
        while let Some(idx) = cur {
            let node = self.nodes[idx].as_ref().unwrap();
            if !self.within_max(node, spec) {
                break;
            }
            count += 1;
            cur = node.forward[0];
        }
        count
    }

    /// Members with scores in `spec`, ascending by `(score, member)`.
    pub fn nodes_in_range(&self, spec: &RangeSpec) -> Vec<(&[u8], f64)> {
        let mut out = Vec::new();
        let mut cur = self.first_past_min(spec);
        while let Some(idx) = cur {
            let node = self.nodes[idx].as_ref().unwrap();
            if !self.within_max(node, spec) {
                break;
            }
            out.push((node.member.as_slice(), node.score));
            cur = node.forward[0];
        }
        out
    }

    /// All members ascending by `(score, member)` — used by the snapshot
    /// writer, which needs the complete set rather than a bounded range.
    pub fn iter_all(&self) -> Vec<(&[u8], f64)> {
        self.nodes_in_range(&RangeSpec::inclusive(-f64::MAX, f64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members_of<'a>(v: &'a [(&'a [u8], f64)]) -> Vec<&'a [u8]> {
        v.iter().map(|(m, _)| *m).collect()
    }

    #[test]
    fn insert_orders_by_score_then_member() {
        let mut sl = SkipList::new();
        sl.insert(b"banana".to_vec(), 2.0);
        sl.insert(b"apple".to_vec(), 1.0);
        sl.insert(b"cherry".to_vec(), 3.0);
        let all = sl.iter_all();
        assert_eq!(
            members_of(&all),
            vec![b"apple".as_slice(), b"banana".as_slice(), b"cherry".as_slice()]
        );
        assert_eq!(sl.length(), 3);
    }

    #[test]
    fn equal_scores_break_ties_by_member_bytes() {
        let mut sl = SkipList::new();
        sl.insert(b"zeta".to_vec(), 1.0);
        sl.insert(b"alpha".to_vec(), 1.0);
        sl.insert(b"mid".to_vec(), 1.0);
        let all = sl.iter_all();
        assert_eq!(
            members_of(&all),
            vec![b"alpha".as_slice(), b"mid".as_slice(), b"zeta".as_slice()]
        );
    }

    #[test]
    fn reinsert_overrides_score() {
        let mut sl = SkipList::new();
        sl.insert(b"m".to_vec(), 1.0);
        sl.insert(b"m".to_vec(), 5.0);
        assert_eq!(sl.length(), 1);
        assert_eq!(sl.score_of(b"m"), Some(5.0));
        assert_eq!(members_of(&sl.iter_all()), vec![b"m".as_slice()]);
        assert_eq!(sl.iter_all()[0].1, 5.0);
    }

    #[test]
    fn delete_removes_and_shrinks_level() {
        let mut sl = SkipList::new();
        for i in 0..50 {
            sl.insert(format!("k{i}").into_bytes(), i as f64);
        }
        assert_eq!(sl.length(), 50);
        for i in 0..50 {
            assert!(sl.delete(format!("k{i}").into_bytes().as_slice(), i as f64));
        }
        assert_eq!(sl.length(), 0);
        assert_eq!(sl.iter_all().len(), 0);
        // Arena slots should be recycled by subsequent inserts.
        sl.insert(b"fresh".to_vec(), 1.0);
        assert_eq!(sl.length(), 1);
    }

    #[test]
    fn range_queries_are_inclusive_by_default() {
        let mut sl = SkipList::new();
        sl.insert(b"m1".to_vec(), 1.0);
        sl.insert(b"m2".to_vec(), 2.0);
        sl.insert(b"m3".to_vec(), 3.0);
        let spec = RangeSpec::inclusive(1.5, 2.5);
        assert_eq!(members_of(&sl.nodes_in_range(&spec)), vec![b"m2".as_slice()]);
        let spec_full = RangeSpec::inclusive(0.0, 10.0);
        assert_eq!(sl.count_in_range(&spec_full), 3);
    }

    #[test]
    fn skiplist_invariant_matches_auxiliary_index() {
        let mut sl = SkipList::new();
        let mut rng = rand::thread_rng();
        for i in 0..200 {
            let score = rng.gen_range(-50.0..50.0);
            sl.insert(format!("member-{i}").into_bytes(), score);
        }
        for i in (0..200).step_by(3) {
            let member = format!("member-{i}").into_bytes();
            if let Some(score) = sl.score_of(&member) {
                sl.delete(&member, score);
            }
        }
        let all = sl.iter_all();
        assert_eq!(all.len(), sl.length());
        for window in all.windows(2) {
            let (m0, s0) = window[0];
            let (m1, s1) = window[1];
            assert!(s0 < s1 || (s0 == s1 && m0 < m1));
        }
    }
}
