//! Path finding over declared transport links.
//!
//! Link transport processes may only move along the links they declare.
//! [`LinkGraph`] stores those links as an undirected adjacency list and
//! answers shortest-path queries weighted by Manhattan distance.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::fixed::{Fixed64, Position};
use crate::id::LocationId;

/// Undirected adjacency over locations.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    adjacency: HashMap<LocationId, Vec<LocationId>>,
    /// Locations in first-seen order, for deterministic lookups.
    locations: Vec<LocationId>,
}

impl LinkGraph {
    pub fn new(links: &[(LocationId, LocationId)]) -> Self {
        let mut graph = Self::default();
        for &(a, b) in links {
            graph.add_link(a, b);
        }
        graph
    }

    pub fn add_link(&mut self, a: LocationId, b: LocationId) {
        for (from, to) in [(a, b), (b, a)] {
            let neighbors = self.adjacency.entry(from).or_insert_with(|| {
                self.locations.push(from);
                Vec::new()
            });
            if !neighbors.contains(&to) {
                neighbors.push(to);
            }
        }
    }

    pub fn contains(&self, location: LocationId) -> bool {
        self.adjacency.contains_key(&location)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn neighbors(&self, location: LocationId) -> &[LocationId] {
        self.adjacency
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The linked location standing exactly at `position`, if any. Lets a
    /// vehicle parked at an unlinked spot join the network.
    pub fn location_at(
        &self,
        position: Position,
        position_of: impl Fn(LocationId) -> Position,
    ) -> Option<LocationId> {
        self.locations
            .iter()
            .copied()
            .find(|l| position_of(*l) == position)
    }

    /// Shortest path from `from` to `to`, both endpoints included. Edge
    /// weights are Manhattan distances; ties go to the link declared first.
    pub fn shortest_path(
        &self,
        from: LocationId,
        to: LocationId,
        position_of: impl Fn(LocationId) -> Position,
    ) -> Option<Vec<LocationId>> {
        if from == to {
            return Some(vec![from]);
        }
        if !self.contains(from) || !self.contains(to) {
            return None;
        }

        let mut dist: HashMap<LocationId, Fixed64> = HashMap::new();
        let mut prev: HashMap<LocationId, LocationId> = HashMap::new();
        // (distance, insertion sequence) keeps the pop order total.
        let mut heap: BinaryHeap<Reverse<(Fixed64, u64, usize)>> = BinaryHeap::new();
        let mut seq = 0u64;
        let index_of = |l: LocationId| self.locations.iter().position(|x| *x == l);

        dist.insert(from, Fixed64::ZERO);
        if let Some(i) = index_of(from) {
            heap.push(Reverse((Fixed64::ZERO, seq, i)));
        }

        while let Some(Reverse((d, _, i))) = heap.pop() {
            let current = self.locations[i];
            if current == to {
                break;
            }
            if dist.get(&current).is_some_and(|best| d > *best) {
                continue;
            }
            let here = position_of(current);
            for &next in self.neighbors(current) {
                let candidate = d.saturating_add(here.manhattan(&position_of(next)));
                if dist.get(&next).is_none_or(|best| candidate < *best) {
                    dist.insert(next, candidate);
                    prev.insert(next, current);
                    seq += 1;
                    if let Some(j) = index_of(next) {
                        heap.push(Reverse((candidate, seq, j)));
                    }
                }
            }
        }

        if !prev.contains_key(&to) {
            return None;
        }
        let mut path = vec![to];
        let mut cursor = to;
        while let Some(&p) = prev.get(&cursor) {
            path.push(p);
            cursor = p;
            if cursor == from {
                break;
            }
        }
        path.reverse();
        Some(path)
    }
}
