//! Top-level subcommand orchestration.

pub mod apply;
pub mod check;
pub mod completions;
pub mod plan;
pub mod version;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::ManifestOpts;
use crate::config::{self, Manifest};
use crate::error::{ApplyError, ProvisionError, ValidationError};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::Logger;
use crate::platform::Platform;

/// Exit status for a manifest that fails validation.
pub const EXIT_VALIDATION: u8 = 2;
/// Exit status for a run halted by a failing action (and other errors).
pub const EXIT_FAILURE: u8 = 1;
/// Exit status for a run cancelled at an action boundary.
pub const EXIT_CANCELLED: u8 = 130;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates platform detection and manifest loading so that each
/// command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Detected host facts.
    pub platform: Platform,
    /// The validated manifest.
    pub manifest: Manifest,
    /// Command runner shared by every collaborator.
    pub executor: Arc<dyn Executor>,
}

impl CommandSetup {
    /// Detect the platform and load the manifest named in `opts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be detected or the manifest
    /// is invalid.
    pub fn init(opts: &ManifestOpts, log: &Logger) -> Result<Self> {
        Self::init_with(opts, log, Arc::new(SystemExecutor))
    }

    /// Like [`Self::init`], with an explicit executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be detected or the manifest
    /// is invalid.
    pub fn init_with(opts: &ManifestOpts, log: &Logger, executor: Arc<dyn Executor>) -> Result<Self> {
        log.stage("Detecting platform");
        let platform = Platform::detect(&*executor)?;
        log.info(&format!(
            "fedora {}, privilege: {}",
            platform.fedora_version.as_deref().unwrap_or("unknown"),
            platform.privilege
        ));

        log.stage("Loading manifest");
        let overrides: BTreeMap<String, String> = opts.vars.iter().cloned().collect();
        let manifest = config::load(&opts.manifest, &platform.builtin_vars(), &overrides)?;
        log.info(&format!(
            "loaded {} entries from {}",
            manifest.len(),
            opts.manifest.display()
        ));
        for entry in manifest.ordered() {
            log.debug(&format!("{} ({} {})", entry.id, entry.kind, entry.target));
        }

        let warnings = manifest.warnings(&platform.home);
        if !warnings.is_empty() {
            log.warn(&format!("found {} manifest warning(s):", warnings.len()));
            for warning in &warnings {
                log.warn(&format!("  [{}]: {}", warning.item, warning.message));
            }
        }

        Ok(Self {
            platform,
            manifest,
            executor,
        })
    }
}

/// Map a command failure to the process exit status.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ValidationError>().is_some() {
        return EXIT_VALIDATION;
    }
    let apply = err.downcast_ref::<ApplyError>().or_else(|| {
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::Apply(e)) => Some(e),
            _ => None,
        }
    });
    match (apply, err.downcast_ref::<ProvisionError>()) {
        (Some(ApplyError::Cancelled { .. }), _) => EXIT_CANCELLED,
        (_, Some(ProvisionError::Validation(_))) => EXIT_VALIDATION,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::unreachable
)]
mod tests {
    use super::*;
    use crate::error::{ActionError, SnapshotError};
    use crate::exec::test_helpers::MockExecutor;
    use crate::logging::isolated_logger;

    fn opts(manifest: &std::path::Path, vars: &[(&str, &str)]) -> ManifestOpts {
        ManifestOpts {
            manifest: manifest.to_path_buf(),
            vars: vars
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn executor() -> Arc<dyn Executor> {
        Arc::new(MockExecutor::with_responses(vec![
            (true, "40\n".to_string()),
            (true, "0\n".to_string()),
        ]))
    }

    #[test]
    fn init_loads_manifest_with_overrides() {
        let (log, tmp, _guard) = isolated_logger();
        let path = tmp.path().join("host.toml");
        std::fs::write(
            &path,
            r#"
[vars]
greeting = "hello"

[[resource]]
kind = "file"
target = "/etc/motd"
content = "{{ greeting }} from fedora {{ fedora_version }}\n"
owner = "root"
"#,
        )
        .unwrap();

        let setup = CommandSetup::init_with(&opts(&path, &[("greeting", "hi")]), &log, executor())
            .unwrap();

        assert_eq!(setup.platform.fedora_version.as_deref(), Some("40"));
        assert_eq!(setup.manifest.len(), 1);
        let entry = setup.manifest.get("file:/etc/motd").unwrap();
        match &entry.desired {
            config::entry::DesiredState::FilePresent { content, .. } => {
                assert_eq!(content.bytes, b"hi from fedora 40\n");
            }
            other => unreachable!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn init_rejects_invalid_manifest() {
        let (log, tmp, _guard) = isolated_logger();
        let path = tmp.path().join("host.toml");
        std::fs::write(
            &path,
            r#"
[[resource]]
id = "a"
kind = "package"
target = "a"
depends_on = ["b"]

[[resource]]
id = "b"
kind = "package"
target = "b"
depends_on = ["a"]
"#,
        )
        .unwrap();

        let err = CommandSetup::init_with(&opts(&path, &[]), &log, executor()).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_VALIDATION);
    }

    #[test]
    fn exit_codes_follow_error_type() {
        let validation = anyhow::Error::from(ValidationError::DuplicateId("x".to_string()));
        assert_eq!(exit_code(&validation), EXIT_VALIDATION);

        let halted = anyhow::Error::from(ApplyError::Halted {
            index: 2,
            total: 3,
            entry: "b".to_string(),
            action: "install b".to_string(),
            source: ActionError::permanent("boom"),
        });
        assert_eq!(exit_code(&halted), EXIT_FAILURE);

        let cancelled = anyhow::Error::from(ApplyError::Cancelled { index: 1, total: 2 });
        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);

        let wrapped = anyhow::Error::from(ProvisionError::Apply(ApplyError::Cancelled {
            index: 1,
            total: 1,
        }));
        assert_eq!(exit_code(&wrapped), EXIT_CANCELLED);

        let snapshot = anyhow::Error::from(ProvisionError::Snapshot(SnapshotError {
            entry: "git".to_string(),
            source: ActionError::permanent("rpm: not found"),
        }));
        assert_eq!(exit_code(&snapshot), EXIT_FAILURE);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_FAILURE);
    }

    #[test]
    fn validation_error_survives_context() {
        use anyhow::Context as _;
        let err = Err::<(), _>(ValidationError::DuplicateId("x".to_string()))
            .context("loading host.toml")
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_VALIDATION);
    }
}
