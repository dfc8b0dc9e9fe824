//! Resolve `parent` and `dependencies` values to concrete plan files.
//!
//! With duplicate ids a bare number is ambiguous. Each value is narrowed
//! through a fixed chain of tie-breakers until one file remains:
//!
//! 1. structural evidence: the candidate parent lists the referrer as a
//!    dependency, or the candidate dependency names the referrer as parent;
//! 2. conflict role: a shifted referrer prefers shifted candidates and a
//!    keeper prefers the keeper;
//! 3. branch side: candidates changed on the branch exactly when the
//!    referrer was;
//! 4. the keeper, then the first candidate by path.
//!
//! Values naming no plan at all stay dangling and are never rewritten.

use std::collections::HashSet;
use std::path::PathBuf;

use super::Index;
use super::conflicts::{Role, same_file};
use plank_store::PlanId;

/// What a reference resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// Index of the referenced plan.
    Plan(usize),
    /// No plan carries this id.
    Dangling(PlanId),
}

/// Resolved edges for every plan, by index.
#[derive(Debug, Clone)]
pub(crate) struct Links {
    pub parent: Vec<Option<Target>>,
    pub dependencies: Vec<Vec<Target>>,
    pub children: Vec<Vec<usize>>,
}

impl Links {
    pub fn parent_of(&self, i: usize) -> Option<usize> {
        match self.parent[i] {
            Some(Target::Plan(p)) => Some(p),
            _ => None,
        }
    }

    /// Whether `node` sits somewhere below `ancestor` in the parent forest.
    pub fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let mut seen = HashSet::from([node]);
        let mut cur = node;
        while let Some(p) = self.parent_of(cur) {
            if p == ancestor {
                return true;
            }
            if !seen.insert(p) {
                return false;
            }
            cur = p;
        }
        false
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Parent,
    Dependency,
}

pub(crate) fn resolve(
    index: &Index<'_>,
    roles: &[Role],
    changed: Option<&HashSet<PathBuf>>,
) -> Links {
    let n = index.entries.len();
    let changed_flags: Option<Vec<bool>> = changed.map(|set| {
        (0..n)
            .map(|i| set.iter().any(|c| same_file(c, index.path(i))))
            .collect()
    });
    let resolver = Resolver {
        index,
        roles,
        changed: changed_flags.as_deref(),
    };

    let mut parent = Vec::with_capacity(n);
    let mut dependencies = Vec::with_capacity(n);
    let mut children = vec![Vec::new(); n];

    for (i, entry) in index.entries.iter().enumerate() {
        let p = entry
            .plan
            .parent
            .map(|v| resolver.target(i, v, RefKind::Parent));
        if let Some(Target::Plan(pi)) = p {
            children[pi].push(i);
        }
        parent.push(p);

        dependencies.push(
            entry
                .plan
                .dependencies
                .iter()
                .map(|&v| resolver.target(i, v, RefKind::Dependency))
                .collect(),
        );
    }

    Links {
        parent,
        dependencies,
        children,
    }
}

struct Resolver<'a, 'b> {
    index: &'a Index<'b>,
    roles: &'a [Role],
    changed: Option<&'a [bool]>,
}

impl Resolver<'_, '_> {
    fn target(&self, referrer: usize, value: PlanId, kind: RefKind) -> Target {
        let Some(members) = self.index.by_id.get(&value) else {
            return Target::Dangling(value);
        };
        let mut candidates: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&m| m != referrer)
            .collect();
        match candidates.len() {
            0 => return Target::Dangling(value),
            1 => return Target::Plan(candidates[0]),
            _ => {}
        }

        let referrer_plan = &self.index.entries[referrer].plan;

        narrow(&mut candidates, |m| {
            let plan = &self.index.entries[m].plan;
            match (kind, referrer_plan.id) {
                (RefKind::Parent, Some(rid)) => plan.dependencies.contains(&rid),
                (RefKind::Dependency, Some(rid)) => plan.parent == Some(rid),
                (_, None) => false,
            }
        });

        match self.roles[referrer] {
            Role::Shifted => narrow(&mut candidates, |m| self.roles[m] == Role::Shifted),
            Role::Keeper => narrow(&mut candidates, |m| self.roles[m] == Role::Keeper),
            Role::Unique => {}
        }

        if let Some(flags) = self.changed {
            narrow(&mut candidates, |m| flags[m] == flags[referrer]);
        }

        let chosen = candidates
            .iter()
            .copied()
            .find(|&m| self.roles[m] == Role::Keeper)
            .unwrap_or(candidates[0]);
        Target::Plan(chosen)
    }
}

/// Keep only candidates matching `pred`, unless none do.
fn narrow(candidates: &mut Vec<usize>, pred: impl Fn(usize) -> bool) {
    if candidates.len() < 2 {
        return;
    }
    let matching: Vec<usize> = candidates.iter().copied().filter(|&m| pred(m)).collect();
    if !matching.is_empty() {
        *candidates = matching;
    }
}
