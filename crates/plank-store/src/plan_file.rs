//! On-disk TOML format for plan documents.
//!
//! A plan file carries a `[plan]` table with metadata and free text, and an
//! optional `[[tasks]]` array (each task optionally with `[[tasks.steps]]`):
//!
//! ```toml
//! [plan]
//! id = 3
//! uuid = "8a0c3f1e-5c5e-4c8e-9d61-0a3b0f2f6c11"
//! title = "Implement login endpoint"
//! goal = "Users can log in"
//! status = "pending"
//! priority = "high"
//! parent = 1
//! dependencies = [2]
//!
//! [[tasks]]
//! title = "Handler"
//! description = "Write the /login handler"
//! done = false
//! ```
//!
//! Files are named `<id>-<slug>.toml`. Full rewrites go through
//! [`render_plan_file`]; targeted field updates go through [`edit_plan_file`],
//! which preserves comments and formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Plan, PlanId, PlanStatus, Priority, Task};

/// Errors that can occur while reading or writing a plan document.
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("TOML document error: {0}")]
    DocumentError(#[from] toml_edit::TomlError),

    #[error("plan id must be a positive integer")]
    ZeroId,

    #[error("plan {0} lists itself as its parent")]
    SelfParent(PlanId),

    #[error("plan {0} lists itself as a dependency")]
    SelfDependency(PlanId),

    #[error("plan id {0} does not fit in a TOML integer")]
    IdOutOfRange(PlanId),

    #[error("document has no [plan] table")]
    MissingPlanTable,
}

/// Top-level structure of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanFile {
    plan: PlanMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tasks: Vec<Task>,
}

/// Plan-level metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<PlanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<Uuid>,
    title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    goal: String,
    #[serde(default)]
    status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<PlanId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<PlanId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    container: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    details: String,
}

/// Parse and validate the contents of a plan file.
pub fn parse_plan_file(content: &str) -> Result<Plan, PlanFileError> {
    let file: PlanFile = toml::from_str(content)?;
    let meta = file.plan;

    if meta.id == Some(0) {
        return Err(PlanFileError::ZeroId);
    }
    if let Some(id) = meta.id {
        if meta.parent == Some(id) {
            return Err(PlanFileError::SelfParent(id));
        }
        if meta.dependencies.contains(&id) {
            return Err(PlanFileError::SelfDependency(id));
        }
    }

    // Dependencies are an ordered set.
    let mut dependencies = Vec::with_capacity(meta.dependencies.len());
    for dep in meta.dependencies {
        if !dependencies.contains(&dep) {
            dependencies.push(dep);
        }
    }

    Ok(Plan {
        id: meta.id,
        uuid: meta.uuid,
        title: meta.title,
        goal: meta.goal,
        details: meta.details,
        status: meta.status,
        priority: meta.priority,
        parent: meta.parent,
        dependencies,
        container: meta.container,
        created_at: meta.created_at,
        updated_at: meta.updated_at,
        tasks: file.tasks,
    })
}

/// Serialize a plan into a fresh plan-file document.
pub fn render_plan_file(plan: &Plan) -> Result<String, PlanFileError> {
    let file = PlanFile {
        plan: PlanMeta {
            id: plan.id,
            uuid: plan.uuid,
            title: plan.title.clone(),
            goal: plan.goal.clone(),
            status: plan.status,
            priority: plan.priority,
            parent: plan.parent,
            dependencies: plan.dependencies.clone(),
            container: plan.container,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
            details: plan.details.clone(),
        },
        tasks: plan.tasks.clone(),
    };
    Ok(toml::to_string_pretty(&file)?)
}

// -----------------------------------------------------------------------
// Surgical edits
// -----------------------------------------------------------------------

/// A set of field updates applied to an existing plan document.
///
/// `None` leaves a field untouched. For `parent`, `Some(None)` removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanEdit {
    pub id: Option<PlanId>,
    pub uuid: Option<Uuid>,
    pub parent: Option<Option<PlanId>>,
    pub dependencies: Option<Vec<PlanId>>,
    pub status: Option<PlanStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlanEdit {
    /// Whether applying this edit would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply a [`PlanEdit`] to the text of a plan file, preserving comments,
/// key order, and formatting of everything else.
pub fn edit_plan_file(content: &str, edit: &PlanEdit) -> Result<String, PlanFileError> {
    let mut doc: toml_edit::DocumentMut = content.parse()?;

    let plan_table = doc
        .get_mut("plan")
        .and_then(|v| v.as_table_mut())
        .ok_or(PlanFileError::MissingPlanTable)?;

    // Identity keys go first when they are new, so collect the existing
    // entries and re-add them after.
    let needs_reorder = (edit.id.is_some() && !plan_table.contains_key("id"))
        || (edit.uuid.is_some() && !plan_table.contains_key("uuid"));
    if needs_reorder {
        let entries: Vec<(String, toml_edit::Item)> = plan_table
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        plan_table.clear();
        if let Some(id) = edit.id {
            plan_table.insert("id", toml_edit::value(toml_int(id)?));
        } else if let Some((_, existing)) = entries.iter().find(|(k, _)| k == "id") {
            plan_table.insert("id", existing.clone());
        }
        if let Some(uuid) = edit.uuid {
            plan_table.insert("uuid", toml_edit::value(uuid.to_string()));
        } else if let Some((_, existing)) = entries.iter().find(|(k, _)| k == "uuid") {
            plan_table.insert("uuid", existing.clone());
        }
        for (key, value) in entries {
            if key != "id" && key != "uuid" {
                plan_table.insert(&key, value);
            }
        }
    } else {
        if let Some(id) = edit.id {
            plan_table.insert("id", toml_edit::value(toml_int(id)?));
        }
        if let Some(uuid) = edit.uuid {
            plan_table.insert("uuid", toml_edit::value(uuid.to_string()));
        }
    }

    match edit.parent {
        Some(Some(parent)) => {
            plan_table.insert("parent", toml_edit::value(toml_int(parent)?));
        }
        Some(None) => {
            plan_table.remove("parent");
        }
        None => {}
    }

    if let Some(ref deps) = edit.dependencies {
        if deps.is_empty() {
            plan_table.remove("dependencies");
        } else {
            let mut array = toml_edit::Array::new();
            for dep in deps {
                array.push(toml_int(*dep)?);
            }
            plan_table.insert("dependencies", toml_edit::value(array));
        }
    }

    if let Some(status) = edit.status {
        plan_table.insert("status", toml_edit::value(status.to_string()));
    }

    if let Some(updated_at) = edit.updated_at {
        plan_table.insert("updated_at", toml_edit::value(updated_at.to_rfc3339()));
    }

    Ok(doc.to_string())
}

fn toml_int(id: PlanId) -> Result<i64, PlanFileError> {
    i64::try_from(id).map_err(|_| PlanFileError::IdOutOfRange(id))
}

// -----------------------------------------------------------------------
// File names
// -----------------------------------------------------------------------

/// Extension used by plan files.
pub const PLAN_FILE_EXTENSION: &str = "toml";

/// Build the conventional file name for a plan: `<id>-<slug>.toml`.
pub fn plan_file_name(id: PlanId, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{id}.{PLAN_FILE_EXTENSION}")
    } else {
        format!("{id}-{slug}.{PLAN_FILE_EXTENSION}")
    }
}

/// Lowercase, dash-separated, at most 50 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let trimmed: String = slug.trim_end_matches('-').chars().take(50).collect();
    trimmed.trim_end_matches('-').to_string()
}

/// The numeric id embedded at the start of a file name, if any.
///
/// Recognises `<id>-anything` and `<id>.<ext>`.
pub fn file_name_id(file_name: &str) -> Option<PlanId> {
    split_id_prefix(file_name).map(|(id, _)| id)
}

/// The embedded id plus the remainder of the name after its digits.
fn split_id_prefix(file_name: &str) -> Option<(PlanId, &str)> {
    let digits_len = file_name
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let (digits, rest) = file_name.split_at(digits_len);
    if rest.starts_with('-') || rest.starts_with('.') {
        digits.parse().ok().map(|id| (id, rest))
    } else {
        None
    }
}

/// Rewrite the id prefix of `file_name` from `old` to `new`.
///
/// Returns `None` when the name does not embed `old`. Zero padding on the
/// old prefix is dropped.
pub fn rename_for_id(file_name: &str, old: PlanId, new: PlanId) -> Option<String> {
    match split_id_prefix(file_name) {
        Some((id, rest)) if id == old => Some(format!("{new}{rest}")),
        _ => None,
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
