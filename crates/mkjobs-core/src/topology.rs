//! Processor groups and worker placement
//!
//! A [`Topology`] is computed once at startup and never changes. Workers are
//! spread across its groups by a [`PlacementCursor`]: round-robin over the
//! groups, where a group with `k` processors receives `k` workers per
//! allocation cycle, interleaved with the other groups rather than in one
//! run. Within a group the favored half of the processors alternates from
//! one cycle to the next so low-numbered processors are not always chosen
//! first.

use crate::constants::MAX_GROUP_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One partition of the machine's processors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorGroup {
    cpus: Vec<usize>,
}

impl ProcessorGroup {
    pub fn new(cpus: Vec<usize>) -> Self {
        Self { cpus }
    }

    /// OS processor numbers in this group
    #[inline]
    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }

    /// Active processor count
    #[inline]
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

/// Immutable processor-group layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    groups: Vec<ProcessorGroup>,
}

impl Topology {
    /// Build from per-group CPU lists
    ///
    /// Empty groups are dropped, groups larger than `MAX_GROUP_SIZE` are
    /// split, and an empty layout becomes a single group holding CPU 0.
    pub fn new(groups: Vec<Vec<usize>>) -> Self {
        let mut out = Vec::with_capacity(groups.len());
        for mut cpus in groups {
            cpus.sort_unstable();
            cpus.dedup();
            for chunk in cpus.chunks(MAX_GROUP_SIZE) {
                out.push(ProcessorGroup::new(chunk.to_vec()));
            }
        }
        if out.is_empty() {
            out.push(ProcessorGroup::new(vec![0]));
        }
        Self { groups: out }
    }

    /// A single group of CPUs `0..count`
    pub fn single(count: usize) -> Self {
        Self::new(vec![(0..count.max(1)).collect()])
    }

    /// `groups` groups of `per_group` consecutive CPUs each
    pub fn uniform(groups: usize, per_group: usize) -> Self {
        let per_group = per_group.max(1);
        Self::new(
            (0..groups.max(1))
                .map(|g| (g * per_group..(g + 1) * per_group).collect())
                .collect(),
        )
    }

    #[inline]
    pub fn groups(&self) -> &[ProcessorGroup] {
        &self.groups
    }

    #[inline]
    pub fn group(&self, index: usize) -> &ProcessorGroup {
        &self.groups[index]
    }

    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn total_processors(&self) -> usize {
        self.groups.iter().map(ProcessorGroup::len).sum()
    }

    fn largest_group(&self) -> usize {
        self.groups.iter().map(ProcessorGroup::len).max().unwrap_or(1)
    }
}

/// Parse a kernel CPU list such as `0-3,8,10-11`
///
/// Malformed pieces are skipped.
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    if lo <= hi {
                        cpus.extend(lo..=hi);
                    }
                }
            }
            None => {
                if let Ok(cpu) = part.parse() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus
}

/// Where a new worker should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Index into `Topology::groups()`
    pub group: usize,
    /// Preferred OS processor inside that group
    pub ideal_cpu: usize,
}

/// Round-robin state for placing new workers
///
/// Only the pool advances it, so the atomics carry no cross-field
/// consistency requirement; they let the cursor be read from diagnostics
/// without a lock.
#[derive(Debug)]
pub struct PlacementCursor {
    group_cursor: AtomicUsize,
    in_group_cursor: AtomicUsize,
    cycle: AtomicUsize,
}

impl PlacementCursor {
    /// Start at group `nesting_depth % group_count` so nested builds begin
    /// their round-robin on different groups.
    pub fn new(topology: &Topology, nesting_depth: usize) -> Self {
        Self {
            group_cursor: AtomicUsize::new(nesting_depth % topology.group_count()),
            in_group_cursor: AtomicUsize::new(0),
            cycle: AtomicUsize::new(0),
        }
    }

    /// Pick the placement for the next worker and advance
    pub fn next(&self, topology: &Topology) -> Placement {
        let groups = topology.group_count();
        let rounds = topology.largest_group();

        loop {
            let group = self.group_cursor.load(Ordering::Relaxed) % groups;
            let round = self.in_group_cursor.load(Ordering::Relaxed);
            let cycle = self.cycle.load(Ordering::Relaxed);

            // Advance: next group in this round, or the next round
            let next_group = group + 1;
            if next_group == groups {
                self.group_cursor.store(0, Ordering::Relaxed);
                if round + 1 >= rounds {
                    self.in_group_cursor.store(0, Ordering::Relaxed);
                    self.cycle.store(cycle.wrapping_add(1), Ordering::Relaxed);
                } else {
                    self.in_group_cursor.store(round + 1, Ordering::Relaxed);
                }
            } else {
                self.group_cursor.store(next_group, Ordering::Relaxed);
            }

            let cpus = topology.group(group).cpus();
            if round < cpus.len() {
                let k = cpus.len();
                let slot = if cycle % 2 == 0 { round } else { (round + k / 2) % k };
                return Placement { group, ideal_cpu: cpus[slot] };
            }
        }
    }

    /// Number of completed allocation cycles
    pub fn cycles(&self) -> usize {
        self.cycle.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpu_list(""), Vec::<usize>::new());
        assert_eq!(parse_cpu_list("x,2,5-4"), vec![2]);
    }

    #[test]
    fn test_large_groups_split() {
        let topo = Topology::new(vec![(0..130).collect()]);
        assert_eq!(topo.group_count(), 3);
        assert_eq!(topo.group(0).len(), 64);
        assert_eq!(topo.group(2).len(), 2);
        assert_eq!(topo.total_processors(), 130);
    }

    #[test]
    fn test_empty_topology_fallback() {
        let topo = Topology::new(vec![vec![], vec![]]);
        assert_eq!(topo.group_count(), 1);
        assert_eq!(topo.group(0).cpus(), &[0]);
    }

    #[test]
    fn test_round_robin_weighted_by_group_size() {
        // Group 0 has 4 CPUs, group 1 has 2
        let topo = Topology::new(vec![vec![0, 1, 2, 3], vec![4, 5]]);
        let cursor = PlacementCursor::new(&topo, 0);
        let groups: Vec<usize> = (0..6).map(|_| cursor.next(&topo).group).collect();
        assert_eq!(groups, vec![0, 1, 0, 1, 0, 0]);
        assert_eq!(cursor.cycles(), 0);

        // Second cycle favors the upper half of group 0
        assert_eq!(cursor.next(&topo), Placement { group: 0, ideal_cpu: 2 });
        assert_eq!(cursor.cycles(), 1);
    }

    #[test]
    fn test_halves_alternate_between_cycles() {
        let topo = Topology::single(4);
        let cursor = PlacementCursor::new(&topo, 0);
        let first: Vec<usize> = (0..4).map(|_| cursor.next(&topo).ideal_cpu).collect();
        let second: Vec<usize> = (0..4).map(|_| cursor.next(&topo).ideal_cpu).collect();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(second, vec![2, 3, 0, 1]);
    }

    #[test]
    fn test_nesting_depth_biases_start_group() {
        let topo = Topology::uniform(3, 2);
        let cursor = PlacementCursor::new(&topo, 4);
        assert_eq!(cursor.next(&topo).group, 1);
        assert_eq!(cursor.next(&topo).group, 2);
        assert_eq!(cursor.next(&topo).group, 0);
    }
}
