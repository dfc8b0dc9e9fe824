//! Hierarchy families and positional id reassignment.

use std::collections::{HashSet, VecDeque};

use super::references::Links;
use super::{Index, RenumberError, cycle_error, precedence_edges, topo};
use plank_store::PlanId;

/// Root of `node`: follow parents upward until there is none. A revisit
/// stops the walk at the current node.
pub(crate) fn root_of(links: &Links, node: usize) -> usize {
    let mut seen = HashSet::from([node]);
    let mut cur = node;
    while let Some(p) = links.parent_of(cur) {
        if !seen.insert(p) {
            break;
        }
        cur = p;
    }
    cur
}

/// Partition the numbered plans into families. Each family lists its root
/// first, then descendants in breadth-first order. Every plan lands in
/// exactly one family.
pub(crate) fn families(index: &Index<'_>, links: &Links) -> Vec<Vec<usize>> {
    let numbered = index.numbered();
    let mut assigned: HashSet<usize> = HashSet::new();
    let mut out = Vec::new();

    for &node in &numbered {
        if assigned.contains(&node) {
            continue;
        }
        let mut root = root_of(links, node);
        if assigned.contains(&root) || index.id(root).is_none() {
            root = node;
        }

        let mut members = Vec::new();
        let mut queue = VecDeque::from([root]);
        assigned.insert(root);
        while let Some(cur) = queue.pop_front() {
            members.push(cur);
            for &child in &links.children[cur] {
                if index.id(child).is_some() && assigned.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        out.push(members);
    }

    out
}

/// A family is disordered when some child's id is below its parent's.
pub(crate) fn is_disordered(members: &[usize], links: &Links, current: &[Option<PlanId>]) -> bool {
    let in_family: HashSet<usize> = members.iter().copied().collect();
    members.iter().any(|&m| match links.parent_of(m) {
        Some(p) if in_family.contains(&p) => current[m] < current[p],
        _ => false,
    })
}

/// Sort the family topologically and hand out its current ids in
/// ascending order. Returns `(index, new id)` for every member.
pub(crate) fn reassign(
    index: &Index<'_>,
    links: &Links,
    members: &[usize],
    current: &[Option<PlanId>],
) -> Result<Vec<(usize, PlanId)>, RenumberError> {
    if members.len() < 2 {
        return Ok(Vec::new());
    }

    let member_set: HashSet<usize> = members.iter().copied().collect();
    let edges = precedence_edges(links, &member_set);
    let order = topo::sort(members, &edges, |i| (current[i], index.path(i).to_path_buf()))
        .map_err(|stuck| cycle_error(index, &stuck))?;

    let mut ids: Vec<PlanId> = members.iter().filter_map(|&m| current[m]).collect();
    ids.sort_unstable();

    Ok(order.into_iter().zip(ids).collect())
}
