use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "botscript")]
#[command(about = "Run robot-control scripts against a simulated robot")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Run(RunArgs),
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(long = "script")]
    pub(crate) script: String,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    #[arg(long = "loop")]
    pub(crate) looping: bool,
    #[arg(long = "max-runs")]
    pub(crate) max_runs: Option<u64>,
    #[arg(long = "tick-ms")]
    pub(crate) tick_ms: Option<u64>,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub(crate) struct CheckArgs {
    #[arg(long = "script")]
    pub(crate) script: String,
}
