//! Command: show the plan without applying it.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::PlanOpts;
use crate::error::ProvisionError;
use crate::logging::Logger;
use crate::plan::{self, ActionPlan};
use crate::state::{HostState, Inspector, SystemInspector};

use super::CommandSetup;

/// Run the plan command: print what `apply` would do, without doing it.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or the host cannot be
/// inspected.
pub fn run(opts: &PlanOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(&opts.manifest, log)?;
    let inspector = SystemInspector::new(Arc::clone(&setup.executor), setup.platform.privilege);
    let plan = compute(&setup, &inspector, log)?;
    render(&plan, opts.json, log)
}

fn compute(setup: &CommandSetup, inspector: &dyn Inspector, log: &Logger) -> Result<ActionPlan> {
    log.stage("Inspecting host");
    let host = HostState::capture(&setup.manifest, inspector).map_err(ProvisionError::from)?;
    Ok(plan::plan(&setup.manifest, &host))
}

#[allow(clippy::print_stdout)]
fn render(plan: &ActionPlan, json: bool, log: &Logger) -> Result<()> {
    if json {
        println!("{}", plan.to_json().context("failed to serialize plan")?);
        return Ok(());
    }
    log.stage("Plan");
    for line in plan.to_string().lines() {
        log.info(line);
    }
    Ok(())
}
