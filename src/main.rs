//! `provision` command-line entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use provision_cli::apply::CancelFlag;
use provision_cli::cli::{Cli, Command};
use provision_cli::commands;
use provision_cli::logging::{Logger, init_subscriber};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();

    // These write straight to stdout and never log.
    match &args.command {
        Command::Version => {
            commands::version::run();
            return ExitCode::SUCCESS;
        }
        Command::Completions(opts) => {
            commands::completions::run(opts);
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let quiet = matches!(&args.command, Command::Plan(opts) if opts.json);
    init_subscriber(args.global.verbose, quiet, args.command.name());
    let log = Arc::new(Logger::new(args.command.name()));
    log.debug(&format!("provision {}", commands::version::version()));

    let result = match &args.command {
        Command::Apply(opts) => {
            let cancel = CancelFlag::new();
            if let Err(e) = cancel.install_ctrlc_handler() {
                log.warn(&format!("cannot install interrupt handler: {e}"));
            }
            commands::apply::run(opts, &log, &cancel)
        }
        Command::Plan(opts) => commands::plan::run(opts, &log),
        Command::Check(opts) => commands::check::run(opts, &log),
        Command::Version | Command::Completions(_) => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log.error(&format!("{e:#}"));
            ExitCode::from(commands::exit_code(&e))
        }
    }
}
