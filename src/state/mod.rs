//! Host state snapshots.
//!
//! A [`HostState`] maps entry ids to what the host currently looks like.  It
//! is captured through an [`Inspector`] immediately before planning and is
//! never cached or persisted: every run queries the live system.
pub mod inspect;

use std::collections::HashMap;

use crate::config::Manifest;
use crate::config::entry::{Attributes, Entry, Mode, ResourceKind};
use crate::error::SnapshotError;
pub use inspect::{Inspector, SystemInspector};

/// Ownership and permission bits as they are on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedAttributes {
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: Mode,
    /// Owning user name.
    pub owner: String,
    /// Owning group name.
    pub group: String,
}

impl ObservedAttributes {
    /// Returns `true` if every attribute `desired` manages already matches.
    ///
    /// # Examples
    ///
    /// ```
    /// use provision_cli::config::entry::{Attributes, Mode};
    /// use provision_cli::state::ObservedAttributes;
    ///
    /// let observed = ObservedAttributes {
    ///     mode: Mode(0o644),
    ///     owner: "root".into(),
    ///     group: "root".into(),
    /// };
    /// assert!(observed.satisfies(&Attributes::default()));
    /// assert!(!observed.satisfies(&Attributes {
    ///     mode: Some(Mode(0o600)),
    ///     ..Attributes::default()
    /// }));
    /// ```
    #[must_use]
    pub fn satisfies(&self, desired: &Attributes) -> bool {
        desired.mode.is_none_or(|m| m == self.mode)
            && desired.owner.as_ref().is_none_or(|o| *o == self.owner)
            && desired.group.as_ref().is_none_or(|g| *g == self.group)
    }
}

/// What the host currently has for one entry's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Nothing there: package not installed, path missing, unit or key unknown.
    Absent,
    /// Package is installed.
    Package,
    /// A regular file.
    File {
        /// Lowercase hex sha256 of the content.
        digest: String,
        /// Current attributes.
        attrs: ObservedAttributes,
    },
    /// A symbolic link, never followed.  It does not satisfy a file or
    /// directory entry.
    Symlink,
    /// A directory.
    Directory {
        /// Current attributes.
        attrs: ObservedAttributes,
    },
    /// A systemd unit that exists.
    Service {
        /// What `systemctl is-enabled` reports.
        enablement: Enablement,
        /// `systemctl is-active` reports it active.
        active: bool,
    },
    /// A kernel parameter and its current value, whitespace-normalized.
    Sysctl {
        /// Current value.
        value: String,
    },
}

/// Install state of a systemd unit file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    /// Enabled, linked or enabled for this boot only.
    Enabled,
    /// Disabled or masked.
    Disabled,
    /// `static`, `indirect`, `alias`, `generated` or `transient`: the unit has
    /// no install section of its own, so `enable` and `disable` leave it as
    /// it is.  Only its activity can be managed.
    Fixed,
}

/// Point-in-time observations keyed by entry id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    observations: HashMap<String, Observation>,
}

impl HostState {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation for `id`, replacing any previous one.
    pub fn insert(&mut self, id: impl Into<String>, observation: Observation) {
        self.observations.insert(id.into(), observation);
    }

    /// The observation for `id`, if one was made.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Observation> {
        self.observations.get(id)
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Returns `true` if nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Query the host for every entry in `manifest`.
    ///
    /// Package presence comes from a single bulk query; everything else is
    /// inspected per entry.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] naming the first entry that could not be
    /// inspected.
    pub fn capture(manifest: &Manifest, inspector: &dyn Inspector) -> Result<Self, SnapshotError> {
        let has_packages = manifest
            .entries()
            .iter()
            .any(|e| e.kind == ResourceKind::Package);
        let installed = if has_packages {
            Some(
                inspector
                    .installed_packages()
                    .map_err(|source| SnapshotError {
                        entry: "installed packages".to_string(),
                        source,
                    })?,
            )
        } else {
            None
        };

        let mut state = Self::new();
        for entry in manifest.ordered() {
            let observation = match (&installed, entry.kind) {
                (Some(installed), ResourceKind::Package) => {
                    if installed.contains(&entry.target) {
                        Observation::Package
                    } else {
                        Observation::Absent
                    }
                }
                _ => observe(inspector, entry)?,
            };
            tracing::debug!("observed {}: {observation:?}", entry.id);
            state.insert(entry.id.clone(), observation);
        }
        Ok(state)
    }
}

impl FromIterator<(String, Observation)> for HostState {
    fn from_iter<I: IntoIterator<Item = (String, Observation)>>(iter: I) -> Self {
        Self {
            observations: iter.into_iter().collect(),
        }
    }
}

fn observe(inspector: &dyn Inspector, entry: &Entry) -> Result<Observation, SnapshotError> {
    inspector.observe(entry).map_err(|source| SnapshotError {
        entry: entry.id.clone(),
        source,
    })
}
