//! Command: validate the manifest.

use anyhow::Result;

use crate::cli::ManifestOpts;
use crate::logging::Logger;

use super::CommandSetup;

/// Run the check command: load and validate the manifest, touching nothing.
///
/// # Errors
///
/// Returns an error if the manifest is invalid.
pub fn run(opts: &ManifestOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(opts, log)?;
    log.info(&format!(
        "manifest is valid: {} entries",
        setup.manifest.len()
    ));
    Ok(())
}
