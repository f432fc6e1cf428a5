//! Dependency graph utilities for manifest entries.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::entry::Entry;

/// Order entries so every entry comes after all of its dependencies.
///
/// Kahn's algorithm with a min-heap ready queue: whenever several entries
/// are ready, the one declared first in the manifest goes first, so the
/// result is deterministic and matches declaration order when there are no
/// dependencies.  Dependencies that do not name an entry are ignored here;
/// validation reports them separately.
///
/// Returns the indices in execution order, or the ids forming a cycle
/// (first id repeated at the end) if the graph is cyclic.
pub fn topological_order(entries: &[Entry]) -> Result<Vec<usize>, Vec<String>> {
    let id_to_idx: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();

    let mut in_degree: Vec<usize> = entries
        .iter()
        .map(|e| {
            e.depends_on
                .iter()
                .filter(|d| id_to_idx.contains_key(d.as_str()))
                .count()
        })
        .collect();

    let mut reverse_deps: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (i, e) in entries.iter().enumerate() {
        for dep in &e.depends_on {
            if let Some(&dep_idx) = id_to_idx.get(dep.as_str())
                && let Some(rd) = reverse_deps.get_mut(dep_idx)
            {
                rd.push(i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| (d == 0).then_some(Reverse(i)))
        .collect();
    let mut order = Vec::with_capacity(entries.len());

    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        if let Some(dependents) = reverse_deps.get(idx) {
            for &dep in dependents {
                if let Some(count) = in_degree.get_mut(dep) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dep));
                    }
                }
            }
        }
    }

    if order.len() == entries.len() {
        Ok(order)
    } else {
        Err(find_cycle(entries, &id_to_idx, &in_degree))
    }
}

/// Walk unresolved dependencies until an entry repeats.
///
/// Every entry left with a non-zero in-degree after Kahn's algorithm has at
/// least one unresolved dependency, so the walk always closes a loop.
fn find_cycle(entries: &[Entry], id_to_idx: &HashMap<&str, usize>, in_degree: &[usize]) -> Vec<String> {
    let unresolved = |i: usize| in_degree.get(i).is_some_and(|&d| d > 0);

    let Some(start) = (0..entries.len()).find(|&i| unresolved(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            let mut cycle: Vec<String> = path
                .get(pos..)
                .unwrap_or_default()
                .iter()
                .filter_map(|&i| entries.get(i).map(|e| e.id.clone()))
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(current);
        let next = entries.get(current).and_then(|e| {
            e.depends_on
                .iter()
                .filter_map(|d| id_to_idx.get(d.as_str()).copied())
                .find(|&d| unresolved(d))
        });
        match next {
            Some(n) => current = n,
            None => {
                return path
                    .iter()
                    .filter_map(|&i| entries.get(i).map(|e| e.id.clone()))
                    .collect();
            }
        }
    }
}
