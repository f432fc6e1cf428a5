//! Declarative host provisioning for Fedora workstations.
//!
//! A TOML manifest lists packages, files, directories, systemd units and
//! kernel parameters together with the state each should be in.  The engine
//! compares that desired state with what the host reports and runs only the
//! actions needed to close the gap, in dependency order.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: parse, template and validate the manifest
//! - **[`state`]**: observe the host through an [`state::Inspector`]
//! - **[`plan`]**: diff desired against observed state into an ordered plan
//! - **[`apply`]**: execute a plan with retries, re-checks and cancellation
//! - **[`resources`]**: the package, file, service and sysctl collaborators
//! - **[`commands`]**: top-level subcommand orchestration (`apply`, `plan`, `check`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod apply;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod platform;
pub mod resources;
pub mod state;
