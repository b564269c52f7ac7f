//! uatdec: 978 MHz UAT receiver
//!
//! Exit codes: 0 on normal end of input, 1 on runtime errors or
//! signals, 2 on an uncaught panic, 64 on configuration errors (a
//! supervisor should not restart us).

use clap::Parser;
use log::LevelFilter;

mod app;
mod cli;
mod output;
#[cfg(feature = "sdr")]
mod sdr;
mod source;
mod stratux;

use cli::{Args, CliError};

fn main() {
    let exit_code = match std::panic::catch_unwind(uatdec) {
        Ok(Ok(code)) => code,
        Ok(Err(cli_error)) => {
            drop(cli_error.print());
            cli_error.exit_code
        }
        // the default panic hook has already printed the details
        Err(_) => 2,
    };
    std::process::exit(exit_code);
}

fn uatdec() -> Result<i32, CliError> {
    let args = Args::try_parse()?;
    log_setup(&args);
    app::run(&args)
}

fn log_setup(args: &Args) {
    if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("uat978", log_filter)
            .filter_module("uatdec", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}
