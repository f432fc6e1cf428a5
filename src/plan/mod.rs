//! Action plans: the ordered mutations that reconcile a host with a manifest.
pub mod diff;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::entry::{Attributes, ContentOrigin, FileContent};
pub use diff::{diff_entry, plan};

/// One atomic mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    /// Install a package, by name or from `source`.
    Install {
        /// Package name.
        package: String,
        /// URL or path handed to the package manager instead of the name.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// Remove an installed package.
    Remove {
        /// Package name.
        package: String,
    },
    /// Write a file's content, then apply its attributes.
    WriteFile {
        /// Destination path.
        path: PathBuf,
        /// Desired content.
        content: FileContent,
        /// Desired attributes.
        #[serde(skip_serializing_if = "Attributes::is_empty")]
        attrs: Attributes,
    },
    /// Fix mode/owner/group of an existing file or directory.
    SetAttributes {
        /// Target path.
        path: PathBuf,
        /// Desired attributes.
        attrs: Attributes,
    },
    /// Delete a file.
    DeleteFile {
        /// Target path.
        path: PathBuf,
    },
    /// Create a directory (and its parents), then apply its attributes.
    CreateDirectory {
        /// Target path.
        path: PathBuf,
        /// Desired attributes.
        #[serde(skip_serializing_if = "Attributes::is_empty")]
        attrs: Attributes,
    },
    /// Remove an empty directory.
    RemoveDirectory {
        /// Target path.
        path: PathBuf,
    },
    /// Enable a unit, and start it when `now`.
    EnableService {
        /// Unit name.
        unit: String,
        /// Also start the unit.
        now: bool,
    },
    /// Disable a unit, and stop it when `now`.
    DisableService {
        /// Unit name.
        unit: String,
        /// Also stop the unit.
        now: bool,
    },
    /// Set a kernel parameter at runtime and persist it.
    SetSysctl {
        /// Parameter name.
        key: String,
        /// Desired value.
        value: String,
    },
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install {
                package,
                source: None,
            } => write!(f, "install {package}"),
            Self::Install {
                package,
                source: Some(source),
            } => write!(f, "install {package} from {source}"),
            Self::Remove { package } => write!(f, "remove {package}"),
            Self::WriteFile {
                path,
                content,
                attrs,
            } => {
                let short = content.digest.get(..12).unwrap_or(&content.digest);
                match &content.origin {
                    ContentOrigin::Inline => write!(f, "write {} (sha256 {short})", path.display())?,
                    ContentOrigin::Source { path: src } => write!(
                        f,
                        "copy {} to {} (sha256 {short})",
                        src.display(),
                        path.display()
                    )?,
                }
                if attrs.is_empty() {
                    Ok(())
                } else {
                    write!(f, ", {attrs}")
                }
            }
            Self::SetAttributes { path, attrs } => write!(f, "set {attrs} on {}", path.display()),
            Self::DeleteFile { path } => write!(f, "delete {}", path.display()),
            Self::CreateDirectory { path, attrs } => {
                write!(f, "create directory {}", path.display())?;
                if attrs.is_empty() {
                    Ok(())
                } else {
                    write!(f, ", {attrs}")
                }
            }
            Self::RemoveDirectory { path } => write!(f, "remove directory {}", path.display()),
            Self::EnableService { unit, now: true } => write!(f, "enable and start {unit}"),
            Self::EnableService { unit, now: false } => write!(f, "enable {unit}"),
            Self::DisableService { unit, now: true } => write!(f, "disable and stop {unit}"),
            Self::DisableService { unit, now: false } => write!(f, "disable {unit}"),
            Self::SetSysctl { key, value } => write!(f, "set {key} = {value}"),
        }
    }
}

/// An action bound to the manifest entry it converges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    /// Identifier of the manifest entry.
    pub entry: String,
    /// What to do.
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.entry, self.kind)
    }
}

/// Ordered list of actions; dependencies always precede their dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    actions: Vec<Action>,
}

impl ActionPlan {
    /// Create a plan from already-ordered actions.
    #[must_use]
    pub const fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Actions in execution order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of actions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if the host already matches the manifest.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Render the plan as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ActionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            return writeln!(f, "nothing to do");
        }
        let width = self.actions.len().to_string().len();
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "{:>width$}. {action}", i + 1)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ActionPlan {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
