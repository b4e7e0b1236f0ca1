use std::process::ExitCode;

use clap::Parser;

mod connection;
mod repl;

/// Interactive client for a cinder server.
#[derive(Debug, Parser)]
#[command(name = "cinder-cli", version, about)]
struct Opts {
    /// Server address to connect to.
    #[arg(long, default_value = "127.0.0.1:6379")]
    addr: String,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    match repl::run(&opts.addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
