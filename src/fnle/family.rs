//! The sweep-line engine for one address family (IPv4 or IPv6), generic over
//! the address width via [`Address`]. One [`super::Fnle`] owns two of these —
//! one per family.

use super::address::Address;
use super::persist::LineStore;
use crate::error::FnleError;
use std::collections::{HashMap, HashSet};

pub const OVERLAP_CUTOFF: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    First,
    Smallest,
    Largest,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Start,
    End,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Event<A: Address> {
    pub kind: EventKind,
    pub coord: A,
    pub slot: u32,
    pub mate: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum DirectValue<P> {
    One(P),
    Many(Vec<P>),
}

impl<P: Clone + PartialEq> DirectValue<P> {
    fn collapse_if_uniform(self) -> Self {
        match self {
            DirectValue::Many(v) => {
                if v.len() > 1 && v.iter().all(|p| *p == v[0]) {
                    DirectValue::One(v.into_iter().next().unwrap())
                } else {
                    DirectValue::Many(v)
                }
            }
            one => one,
        }
    }

    pub(crate) fn as_vec(&self) -> Vec<P> {
        match self {
            DirectValue::One(p) => vec![p.clone()],
            DirectValue::Many(v) => v.clone(),
        }
    }
}

pub struct Match<P> {
    pub payload: P,
    pub network: Option<(u128, u128)>,
}

pub struct Family<A: Address, P: Clone> {
    pub(crate) sealed: bool,
    pub(crate) ranges: Vec<(A, A)>,
    pub(crate) payloads: Vec<P>,
    pub(crate) line: LineStore<A>,
    pub(crate) where_: Vec<u32>,
    pub(crate) overlaps: Vec<Vec<u32>>,
    pub(crate) direct: HashMap<A, DirectValue<P>>,
    pub(crate) seen_ranges: HashSet<(A, A)>,
    pub oversize_rejected: u64,
    pub duplicate_rejected: u64,
}

impl<A: Address, P: Clone> Default for Family<A, P> {
    fn default() -> Self {
        Self {
            sealed: false,
            ranges: Vec::new(),
            payloads: Vec::new(),
            line: LineStore::Built(Vec::new()),
            where_: Vec::new(),
            overlaps: Vec::new(),
            direct: HashMap::new(),
            seen_ranges: HashSet::new(),
            oversize_rejected: 0,
            duplicate_rejected: 0,
        }
    }
}

impl<A: Address, P: Clone> Family<A, P> {
    pub fn add_range(&mut self, start: A, end: A, payload: P) -> Result<(), FnleError> {
        if self.sealed {
            return Err(FnleError::AlreadySealed);
        }
        let size = start.as_u128().abs_diff(end.as_u128()) + 1;
        if size > A::MAX_RANGE_SIZE {
            self.oversize_rejected += 1;
            return Err(FnleError::RangeTooLarge(start.as_u128(), end.as_u128()));
        }
        if !self.seen_ranges.insert((start, end)) {
            self.duplicate_rejected += 1;
            return Err(FnleError::DuplicateRange(start.as_u128(), end.as_u128()));
        }
        self.ranges.push((start, end));
        self.payloads.push(payload);
        Ok(())
    }

    pub fn add_direct(&mut self, addr: A, payload: P, policy: Policy)
    where
        P: PartialEq,
    {
        match policy {
            Policy::All => {
                let entry = self
                    .direct
                    .entry(addr)
                    .or_insert_with(|| DirectValue::Many(Vec::new()));
                match entry {
                    DirectValue::Many(v) => v.push(payload),
                    DirectValue::One(existing) => {
                        let prior = existing.clone();
                        *entry = DirectValue::Many(vec![prior, payload]);
                    }
                }
            }
            _ => {
                self.direct.insert(addr, DirectValue::One(payload));
            }
        }
    }

    /// Builds the sweep line and the overlap graph (spec.md §4.1 `build()`).
    pub fn build(&mut self)
    where
        P: PartialEq,
    {
        let n = self.ranges.len();
        let mut events: Vec<Event<A>> = Vec::with_capacity(2 * n);
        for (slot, &(s, e)) in self.ranges.iter().enumerate() {
            events.push(Event {
                kind: EventKind::Start,
                coord: s,
                slot: slot as u32,
                mate: 0,
            });
            events.push(Event {
                kind: EventKind::End,
                coord: e,
                slot: slot as u32,
                mate: 0,
            });
        }
        events.sort_by(|a, b| {
            a.coord.cmp(&b.coord).then_with(|| match (a.kind, b.kind) {
                (EventKind::Start, EventKind::End) => std::cmp::Ordering::Less,
                (EventKind::End, EventKind::Start) => std::cmp::Ordering::Greater,
                _ => std::cmp::Ordering::Equal,
            })
        });

        let mut where_ = vec![0u32; n];
        let mut start_idx = vec![0u32; n];
        let mut end_idx = vec![0u32; n];
        for (i, ev) in events.iter().enumerate() {
            match ev.kind {
                EventKind::Start => {
                    where_[ev.slot as usize] = i as u32;
                    start_idx[ev.slot as usize] = i as u32;
                }
                EventKind::End => {
                    end_idx[ev.slot as usize] = i as u32;
                }
            }
        }
        for slot in 0..n {
            let (si, ei) = (start_idx[slot] as usize, end_idx[slot] as usize);
            events[si].mate = ei as u32;
            events[ei].mate = si as u32;
        }

        let mut overlaps: Vec<Vec<u32>> = vec![Vec::new(); n];
        let mut open: Vec<u32> = Vec::new();
        for ev in &events {
            match ev.kind {
                EventKind::Start => {
                    open.push(ev.slot);
                    if open.len() > 1 {
                        for &j in &open {
                            if j != ev.slot {
                                overlaps[ev.slot as usize].push(j);
                                overlaps[j as usize].push(ev.slot);
                            }
                        }
                    }
                }
                EventKind::End => {
                    open.retain(|&s| s != ev.slot);
                }
            }
        }
        let ranges = &self.ranges;
        let size_of = |slot: u32| {
            let (s, e) = ranges[slot as usize];
            e.as_u128() - s.as_u128()
        };
        for (slot, list) in overlaps.iter_mut().enumerate() {
            list.sort_unstable();
            list.dedup();
            list.retain(|&j| j != slot as u32);
            list.sort_by(|&a, &b| size_of(b).cmp(&size_of(a)));
        }

        self.line = LineStore::Built(events);
        self.where_ = where_;
        self.overlaps = overlaps;

        // Collapse ALL-policy direct entries that ended up with identical
        // repeated payloads (spec.md §4.1 step 6).
        let direct = std::mem::take(&mut self.direct);
        self.direct = direct
            .into_iter()
            .map(|(k, v)| (k, v.collapse_if_uniform()))
            .collect();

        self.sealed = true;
    }

    fn size_of(&self, slot: u32) -> u128 {
        let (s, e) = self.ranges[slot as usize];
        e.as_u128() - s.as_u128()
    }

    fn contains(&self, slot: u32, addr: A) -> bool {
        let (s, e) = self.ranges[slot as usize];
        s <= addr && addr <= e
    }

    pub fn lookup(&self, addr: A, policy: Policy) -> Vec<Match<P>> {
        if let Some(dv) = self.direct.get(&addr) {
            return dv
                .as_vec()
                .into_iter()
                .map(|payload| Match {
                    payload,
                    network: None,
                })
                .collect();
        }
        let len = self.line.len();
        if len == 0 {
            return Vec::new();
        }
        let idx = self.partition_point(addr);
        let straight = idx < len && self.line.get(idx).coord == addr;
        let anchor: Option<(u32, bool)> = if straight {
            Some((self.line.get(idx).slot, true))
        } else if idx > 0 {
            let prev = self.line.get(idx - 1);
            Some((prev.slot, matches!(prev.kind, EventKind::Start)))
        } else {
            None
        };

        match policy {
            Policy::First => match anchor {
                Some((slot, true)) => vec![self.to_match(slot)],
                _ => Vec::new(),
            },
            Policy::Smallest | Policy::Largest => {
                let Some((anchor_slot, _)) = anchor else {
                    return Vec::new();
                };
                let mut best: Option<u32> = None;
                let mut best_size: u128 = 0;
                if self.contains(anchor_slot, addr) {
                    best = Some(anchor_slot);
                    best_size = self.size_of(anchor_slot);
                }
                for &cand in self.overlaps[anchor_slot as usize].iter().take(OVERLAP_CUTOFF) {
                    if !self.contains(cand, addr) {
                        continue;
                    }
                    let sz = self.size_of(cand);
                    let better = match (best, policy) {
                        (None, _) => true,
                        (Some(b), Policy::Largest) => sz > best_size || (sz == best_size && cand < b),
                        (Some(b), Policy::Smallest) => sz < best_size || (sz == best_size && cand < b),
                        _ => unreachable!(),
                    };
                    if better {
                        best = Some(cand);
                        best_size = sz;
                    }
                }
                match best {
                    Some(slot) => vec![self.to_match(slot)],
                    None => Vec::new(),
                }
            }
            Policy::All => {
                let Some((anchor_slot, _)) = anchor else {
                    return Vec::new();
                };
                let mut slots = Vec::new();
                if self.contains(anchor_slot, addr) {
                    slots.push(anchor_slot);
                }
                for &cand in self.overlaps[anchor_slot as usize].iter().take(OVERLAP_CUTOFF) {
                    if self.contains(cand, addr) {
                        slots.push(cand);
                    }
                }
                slots.sort_unstable();
                slots.dedup();
                slots.into_iter().map(|s| self.to_match(s)).collect()
            }
        }
    }

    fn to_match(&self, slot: u32) -> Match<P> {
        let (s, e) = self.ranges[slot as usize];
        Match {
            payload: self.payloads[slot as usize].clone(),
            network: Some((s.as_u128(), e.as_u128())),
        }
    }

    /// First index `i` such that `line[i].coord >= addr`.
    fn partition_point(&self, addr: A) -> usize {
        let len = self.line.len();
        let (mut lo, mut hi) = (0usize, len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.line.get(mid).coord < addr {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
