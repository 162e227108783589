// src/main.rs

use pipedag::errors::PipedagError;
use pipedag::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("pipedag error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run_main() -> Result<(), PipedagError> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
