//! tracks - build, benchmark and profile selectively hardened kernels

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use color_eyre::{Report, Result};

mod build;
mod command;
mod common_opts;
mod images;
mod invocation;
mod runner;
mod template;
mod utils;
mod vm;

use crate::images::Images;
use crate::invocation::{Action, Invocation, UsageError};
use crate::runner::{DryRunRunner, ProcessRunner, SystemRunner};

/// Driver to build, profile and benchmark the selectively hardened kernel.
///
/// Kernels and benchmark containers are built with docker; benchmark and
/// profile runs patch a linuxkit template and boot it under qemu.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Print the commands without executing them
    #[clap(long, global = true)]
    dry_run: bool,

    /// Image namespace for kernels and benchmark containers
    #[clap(long, global = true, default_value = images::DEFAULT_NAMESPACE)]
    namespace: String,

    #[command(subcommand)]
    command: Action,
}

/// Install and configure the tracing/logging system.
///
/// Logs go to stderr, filtered by RUST_LOG and defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Report resolution failures against the subcommand that was invoked, so
/// clap prints its usage line rather than the top-level one.
fn usage_error(action: &Action, e: &UsageError) -> clap::Error {
    let mut cmd = Cli::command();
    cmd.set_bin_name(cmd.get_name().to_owned());
    cmd.build();
    match cmd.find_subcommand_mut(action.name()) {
        Some(sub) => sub.error(ErrorKind::ArgumentConflict, e),
        None => cmd.error(ErrorKind::ArgumentConflict, e),
    }
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    let invocation = match Invocation::resolve(&cli.command) {
        Ok(invocation) => invocation,
        Err(e) => usage_error(&cli.command, &e).exit(),
    };
    tracing::debug!("Resolved {invocation:?}");

    let images = Images::new(cli.namespace);
    let mut runner: Box<dyn ProcessRunner> = if cli.dry_run {
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner)
    };

    let status = match &invocation {
        Invocation::Build(target) => build::run(target, &images, runner.as_mut())?,
        Invocation::Vm(vm_run) => vm::run(vm_run, &images, runner.as_mut())?,
    };
    tracing::debug!("exiting");
    std::process::exit(status.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_args(args: &[&str]) -> (Action, UsageError) {
        let cli = Cli::try_parse_from(args).unwrap();
        let e = Invocation::resolve(&cli.command).unwrap_err();
        (cli.command, e)
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_usage_error_names_subcommand() {
        for (args, usage) in [
            (&["tracks", "build", "--kernel", "--level=full"][..], "tracks build"),
            (&["tracks", "benchmark", "--level=selective"][..], "tracks benchmark"),
            (&["tracks", "profile", "--cpus=0"][..], "tracks profile"),
        ] {
            let (action, e) = resolve_args(args);
            let err = usage_error(&action, &e);
            assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
            assert_eq!(err.exit_code(), 2);
            let rendered = err.to_string();
            assert!(rendered.contains(&e.to_string()), "{rendered}");
            assert!(rendered.contains(usage), "{rendered}");
            assert!(!rendered.contains("<COMMAND>"), "{rendered}");
        }
    }
}
