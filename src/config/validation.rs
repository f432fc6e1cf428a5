//! Structural manifest checks: identifiers, dependencies, cycles.
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::entry::{DesiredState, Entry, ResourceKind};
use super::graph;
use crate::error::ValidationError;

/// A non-fatal problem detected while validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The entry that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a warning for `item`.
    #[must_use]
    pub fn new(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Check identifiers and the dependency graph, returning the execution order.
///
/// Checks run in this order so the first reported error is the most
/// specific one: duplicate ids, unknown dependencies, cycles.
///
/// # Errors
///
/// Returns [`ValidationError::DuplicateId`], [`ValidationError::UnknownDependency`]
/// or [`ValidationError::DependencyCycle`].
pub fn validate(entries: &[Entry]) -> Result<Vec<usize>, ValidationError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(ValidationError::DuplicateId(entry.id.clone()));
        }
    }

    for entry in entries {
        if let Some(dep) = entry.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(ValidationError::UnknownDependency {
                id: entry.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    graph::topological_order(entries)
        .map_err(|cycle| ValidationError::DependencyCycle(cycle.join(" → ")))
}

/// Collect non-fatal warnings about a validated manifest.
///
/// - the same target managed by more than one entry of the same kind
/// - a file or directory under `home` with no `owner`, which would end up
///   owned by root when run with privileges
#[must_use]
pub fn warnings(entries: &[Entry], home: &Path) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut by_target: HashMap<(ResourceKind, &str), &str> = HashMap::new();
    for entry in entries {
        if let Some(first) = by_target.insert((entry.kind, entry.target.as_str()), &entry.id) {
            warnings.push(ValidationWarning::new(
                &entry.id,
                format!("{} '{}' is also managed by '{first}'", entry.kind, entry.target),
            ));
        }
    }

    for entry in entries {
        let attrs = match &entry.desired {
            DesiredState::FilePresent { attrs, .. } | DesiredState::DirectoryPresent { attrs } => {
                attrs
            }
            _ => continue,
        };
        if attrs.owner.is_none() && Path::new(&entry.target).starts_with(home) {
            warnings.push(ValidationWarning::new(
                &entry.id,
                format!(
                    "{} is under {} but has no owner; it will be owned by whoever runs provision",
                    entry.target,
                    home.display()
                ),
            ));
        }
    }

    warnings
}
