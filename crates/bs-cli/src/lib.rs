use std::ffi::OsString;
use std::path::Path;

use bs_api::check_source;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_args;
mod config;
mod controller;
mod error_map;
mod robot;
mod source_loader;

pub(crate) use cli_args::{CheckArgs, Cli, Mode, RunArgs};
pub(crate) use config::{load_run_config, RunConfig};
pub(crate) use controller::{emit_report, run_controller};
pub(crate) use error_map::{
    emit_error, map_cli_config_invalid, map_cli_config_read, map_cli_source_path, CliError,
};
pub(crate) use source_loader::resolve_script;

pub const DEFAULT_LOG_FILTER: &str = "bs_runtime=info,bs_api=info,bs_cli=info";

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Mode::Run(args) => run_script(args),
        Mode::Check(args) => check_script(args),
    }
}

fn run_script(args: RunArgs) -> Result<i32, CliError> {
    let script = resolve_script(&args.script)?;
    let mut config = match &args.config {
        Some(path) => load_run_config(Path::new(path))?,
        None => RunConfig::default(),
    };
    config.apply_args(&args);
    config.validate()?;

    let report = run_controller(&script, &config)?;
    emit_report(&report);
    Ok(0)
}

fn check_script(args: CheckArgs) -> Result<i32, CliError> {
    let script = resolve_script(&args.script)?;
    let source = script.load()?;
    check_source(&source, &script.name)?;

    println!("RESULT:OK");
    println!("SCRIPT:{}", script.name);
    Ok(0)
}
