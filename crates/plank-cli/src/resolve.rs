//! Plan reference resolution.
//!
//! Commands accept either a numeric plan id or a path to a plan file. A
//! file path resolves to the id stored in that file.

use std::path::Path;

use anyhow::{Context, Result, bail};

use plank_store::{PlanId, PlanStore};

/// Resolve `input` to a plan id that exists in the store.
pub fn resolve_plan_id(store: &mut PlanStore, input: &str) -> Result<PlanId> {
    if looks_like_file_path(input) {
        return read_plan_id_from_file(store, input);
    }
    match input.parse::<PlanId>() {
        Ok(id) => {
            let set = store.load()?;
            if set.get(id).is_none() {
                bail!("plan {id} not found in {}", set.dir().display());
            }
            Ok(id)
        }
        Err(parse_err) => {
            if Path::new(input).is_file() {
                read_plan_id_from_file(store, input)
            } else {
                Err(parse_err).with_context(|| {
                    format!("invalid plan reference: {input:?} (not a number and not a file)")
                })
            }
        }
    }
}

/// Resolve a list of references, as given to `--depends-on`.
pub fn resolve_plan_ids(store: &mut PlanStore, inputs: &[String]) -> Result<Vec<PlanId>> {
    inputs
        .iter()
        .map(|input| resolve_plan_id(store, input.trim()))
        .collect()
}

fn looks_like_file_path(input: &str) -> bool {
    input.ends_with(".toml") || input.contains('/')
}

fn read_plan_id_from_file(store: &mut PlanStore, input: &str) -> Result<PlanId> {
    let path = store.resolve_path(Path::new(input));
    let set = store.load()?;
    let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
    let entry = set
        .iter()
        .find(|e| e.path == path || e.path.canonicalize().is_ok_and(|p| p == canonical))
        .with_context(|| {
            format!(
                "{} is not a plan file in {}",
                path.display(),
                set.dir().display()
            )
        })?;
    match entry.plan.id {
        Some(id) => Ok(id),
        None => bail!("plan file {} has no id", path.display()),
    }
}
