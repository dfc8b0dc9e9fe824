//! Deterministic topological sort.

use std::collections::{BTreeSet, HashMap};

/// Sort `nodes` so that for every edge `(from, to)` `from` comes first.
///
/// Kahn's algorithm where the ready set is ordered by `key`, so the output
/// is deterministic. Edges touching nodes outside `nodes` are ignored.
/// On a cycle, returns the nodes that could not be placed.
pub(crate) fn sort<K, F>(nodes: &[usize], edges: &[(usize, usize)], key: F) -> Result<Vec<usize>, Vec<usize>>
where
    K: Ord,
    F: Fn(usize) -> K,
{
    let mut in_degree: HashMap<usize, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    let mut adj: HashMap<usize, Vec<usize>> = HashMap::new();

    for &(from, to) in edges {
        if from == to || !in_degree.contains_key(&from) {
            continue;
        }
        let Some(deg) = in_degree.get_mut(&to) else {
            continue;
        };
        *deg += 1;
        adj.entry(from).or_default().push(to);
    }

    let mut ready: BTreeSet<(K, usize)> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(&n, _)| (key(n), n))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, node)) = ready.pop_first() {
        order.push(node);
        for &next in adj.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(deg) = in_degree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert((key(next), next));
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let mut stuck: Vec<usize> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(n, _)| n)
            .collect();
        stuck.sort_unstable();
        return Err(stuck);
    }

    Ok(order)
}
