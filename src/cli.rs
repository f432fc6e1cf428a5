//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::ValidationError;

/// Top-level CLI entry point for the provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Declarative host provisioning for Fedora workstations",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Options accepted by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converge the host to the manifest
    Apply(ApplyOpts),
    /// Print the actions `apply` would take
    Plan(PlanOpts),
    /// Validate the manifest without touching the host
    Check(ManifestOpts),
    /// Print shell completion scripts
    Completions(CompletionsOpts),
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Plan(_) => "plan",
            Self::Check(_) => "check",
            Self::Completions(_) => "completions",
            Self::Version => "version",
        }
    }
}

/// Manifest location and template variable overrides.
#[derive(Args, Debug, Clone)]
pub struct ManifestOpts {
    /// Path to the manifest (TOML)
    pub manifest: PathBuf,

    /// Set a template variable, overriding the manifest's [vars]
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

/// Options for the `apply` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ApplyOpts {
    /// Manifest to apply.
    #[command(flatten)]
    pub manifest: ManifestOpts,

    /// Print the plan without executing it
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Upgrade all installed packages before inspecting the host
    #[arg(long)]
    pub upgrade: bool,
}

/// Options for the `plan` subcommand.
#[derive(Args, Debug, Clone)]
pub struct PlanOpts {
    /// Manifest to plan.
    #[command(flatten)]
    pub manifest: ManifestOpts,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for the `completions` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CompletionsOpts {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// Parse a `KEY=VALUE` argument.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidVariable`] if there is no `=` or the key
/// is empty.
pub fn parse_var(s: &str) -> Result<(String, String), ValidationError> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ValidationError::InvalidVariable(s.to_string())),
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
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_apply_with_vars() {
        let cli = Cli::parse_from([
            "provision",
            "apply",
            "host.toml",
            "--var",
            "user=alice",
            "--var",
            "motd=hello=world",
        ]);
        let Command::Apply(opts) = cli.command else {
            unreachable!("expected apply");
        };
        assert_eq!(opts.manifest.manifest, PathBuf::from("host.toml"));
        assert_eq!(
            opts.manifest.vars,
            vec![
                ("user".to_string(), "alice".to_string()),
                ("motd".to_string(), "hello=world".to_string())
            ]
        );
        assert!(!opts.dry_run);
        assert!(!opts.upgrade);
    }

    #[test]
    fn parse_apply_dry_run_short() {
        let cli = Cli::parse_from(["provision", "apply", "-d", "host.toml"]);
        assert!(matches!(cli.command, Command::Apply(ApplyOpts { dry_run: true, .. })));
    }

    #[test]
    fn parse_apply_upgrade() {
        let cli = Cli::parse_from(["provision", "apply", "--upgrade", "host.toml"]);
        assert!(matches!(cli.command, Command::Apply(ApplyOpts { upgrade: true, .. })));
    }

    #[test]
    fn parse_plan_json() {
        let cli = Cli::parse_from(["provision", "plan", "--json", "host.toml"]);
        assert!(matches!(cli.command, Command::Plan(PlanOpts { json: true, .. })));
        assert_eq!(cli.command.name(), "plan");
    }

    #[test]
    fn parse_check() {
        let cli = Cli::parse_from(["provision", "check", "host.toml"]);
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn parse_completions() {
        let cli = Cli::parse_from(["provision", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Command::Completions(CompletionsOpts {
                shell: clap_complete::Shell::Bash
            })
        ));
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::parse_from(["provision", "plan", "host.toml", "-v"]);
        assert!(cli.global.verbose);
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["provision", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn manifest_is_required() {
        assert!(Cli::try_parse_from(["provision", "apply"]).is_err());
    }

    #[test]
    fn malformed_var_is_rejected() {
        assert!(Cli::try_parse_from(["provision", "check", "m.toml", "--var", "novalue"]).is_err());
        assert!(parse_var("=x").is_err());
        assert_eq!(
            parse_var(" key =v").unwrap(),
            ("key".to_string(), "v".to_string())
        );
    }
}
