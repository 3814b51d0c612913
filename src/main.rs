// src/main.rs

use parexec::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("parexec error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<bool> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    let summary = run(args).await?;
    if !summary.outcomes.is_empty() {
        summary.print();
    }
    Ok(summary.all_succeeded())
}
