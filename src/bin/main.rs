//! Promhouse binary.
//!
//! Runs one export cycle (or an operator command) and exits with a code that
//! tells schedulers what happened: 0 done or nothing to do, 1 internal error,
//! 2 setup error, 3 already running, 4 transport error.

use clap::Parser;
use promhouse_core::cli::{execute, Cli};
use promhouse_core::Error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<Error>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}
