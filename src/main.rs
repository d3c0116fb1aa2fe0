use clap::Parser;
use tracing_subscriber::EnvFilter;

use pagewatch::interfaces::cli::{Cli, EXIT_OK, EXIT_USAGE, run};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagewatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help/--version are not errors
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(run(cli).await);
}
