//! Command: apply the manifest to the host.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::apply::{Applier, CancelFlag, Collaborators};
use crate::cli::ApplyOpts;
use crate::error::ProvisionError;
use crate::logging::{ActionStatus, Log, Logger};
use crate::plan;
use crate::state::HostState;

use super::CommandSetup;

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if the manifest is invalid, the host cannot be
/// inspected, or an action halts the run.
pub fn run(opts: &ApplyOpts, log: &Arc<Logger>, cancel: &CancelFlag) -> Result<()> {
    let setup = CommandSetup::init(&opts.manifest, log)?;
    let collaborators = Collaborators::system(&setup.executor, setup.platform.privilege);
    converge(&setup, collaborators, opts, log, cancel)
}

/// Inspect, plan and (unless dry-running) apply against `collaborators`.
fn converge(
    setup: &CommandSetup,
    collaborators: Collaborators,
    opts: &ApplyOpts,
    log: &Arc<Logger>,
    cancel: &CancelFlag,
) -> Result<()> {
    if opts.upgrade {
        if opts.dry_run {
            log.dry_run("would upgrade all installed packages");
        } else {
            log.stage("Upgrading packages");
            collaborators
                .packages
                .upgrade()
                .context("package upgrade failed")?;
        }
    }

    log.stage("Inspecting host");
    let host = HostState::capture(&setup.manifest, &*collaborators.inspector)
        .map_err(ProvisionError::from)?;
    let plan = plan::plan(&setup.manifest, &host);

    if plan.is_empty() {
        log.info("nothing to do; host matches the manifest");
        return Ok(());
    }

    if opts.dry_run {
        log.stage(&format!("Plan ({} actions)", plan.len()));
        for action in plan.actions() {
            let label = action.to_string();
            log.dry_run(&label);
            log.record_action(&label, ActionStatus::DryRun, None);
        }
        log.print_summary();
        return Ok(());
    }

    log.stage(&format!("Applying {} actions", plan.len()));
    let sink: Arc<dyn Log> = Arc::<Logger>::clone(log);
    let report = Applier::new(collaborators, sink)
        .with_cancel_flag(cancel.clone())
        .apply(&setup.manifest, &plan);
    log.print_summary();
    report.into_result().map_err(ProvisionError::from)?;
    Ok(())
}
