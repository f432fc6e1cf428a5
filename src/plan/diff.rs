//! Compare desired entries with observations and derive actions.
use std::path::PathBuf;

use super::{Action, ActionKind, ActionPlan};
use crate::config::Manifest;
use crate::config::entry::{DesiredState, Entry};
use crate::state::{Enablement, HostState, Observation};

/// Build the plan that converges `host` toward `manifest`.
///
/// Entries are visited in dependency order (ties broken by declaration
/// order) and each yields at most one action.  Resources the host has but
/// the manifest does not mention are never touched.
#[must_use]
pub fn plan(manifest: &Manifest, host: &HostState) -> ActionPlan {
    let actions = manifest
        .ordered()
        .filter_map(|entry| {
            diff_entry(entry, host.get(&entry.id)).map(|kind| Action {
                entry: entry.id.clone(),
                kind,
            })
        })
        .collect();
    ActionPlan::new(actions)
}

/// The single action needed to bring `entry` to its desired state, if any.
///
/// `None` for `observed` means the entry was never inspected; it is treated
/// like [`Observation::Absent`], so "present" entries are planned as
/// creations and "absent" entries need nothing.
#[must_use]
pub fn diff_entry(entry: &Entry, observed: Option<&Observation>) -> Option<ActionKind> {
    let observed = observed.unwrap_or(&Observation::Absent);
    let path = || PathBuf::from(&entry.target);

    match (&entry.desired, observed) {
        (DesiredState::PackagePresent { .. }, Observation::Package) => None,
        (DesiredState::PackagePresent { source }, _) => Some(ActionKind::Install {
            package: entry.target.clone(),
            source: source.clone(),
        }),
        (DesiredState::PackageAbsent, Observation::Package) => Some(ActionKind::Remove {
            package: entry.target.clone(),
        }),
        (DesiredState::PackageAbsent, _) => None,

        (DesiredState::FilePresent { content, attrs }, Observation::File { digest, attrs: have })
            if *digest == content.digest =>
        {
            (!have.satisfies(attrs)).then(|| ActionKind::SetAttributes {
                path: path(),
                attrs: attrs.clone(),
            })
        }
        (DesiredState::FilePresent { content, attrs }, _) => Some(ActionKind::WriteFile {
            path: path(),
            content: content.clone(),
            attrs: attrs.clone(),
        }),
        (DesiredState::FileAbsent, Observation::File { .. } | Observation::Symlink) => {
            Some(ActionKind::DeleteFile { path: path() })
        }
        (DesiredState::FileAbsent, _) => None,

        (DesiredState::DirectoryPresent { attrs }, Observation::Directory { attrs: have }) => {
            (!have.satisfies(attrs)).then(|| ActionKind::SetAttributes {
                path: path(),
                attrs: attrs.clone(),
            })
        }
        (DesiredState::DirectoryPresent { attrs }, _) => Some(ActionKind::CreateDirectory {
            path: path(),
            attrs: attrs.clone(),
        }),
        (DesiredState::DirectoryAbsent, Observation::Directory { .. }) => {
            Some(ActionKind::RemoveDirectory { path: path() })
        }
        (DesiredState::DirectoryAbsent, _) => None,

        (DesiredState::ServiceEnabled { now }, Observation::Service { enablement, active })
            if *enablement != Enablement::Disabled && (!*now || *active) =>
        {
            None
        }
        (DesiredState::ServiceEnabled { now }, _) => Some(ActionKind::EnableService {
            unit: entry.target.clone(),
            now: *now,
        }),
        (DesiredState::ServiceDisabled { now }, Observation::Service { enablement, active })
            if *enablement == Enablement::Enabled || (*now && *active) =>
        {
            Some(ActionKind::DisableService {
                unit: entry.target.clone(),
                now: *now,
            })
        }
        (DesiredState::ServiceDisabled { .. }, _) => None,

        (DesiredState::SysctlValue { value }, Observation::Sysctl { value: have }) if have == value => {
            None
        }
        (DesiredState::SysctlValue { value }, _) => Some(ActionKind::SetSysctl {
            key: entry.target.clone(),
            value: value.clone(),
        }),
    }
}
