fn main() {
    bs_cli::init_tracing();
    std::process::exit(bs_cli::run_cli_from_args(std::env::args_os()));
}
