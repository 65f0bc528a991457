use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = xrouter::cli::Cli::parse();
    if let Err(e) = xrouter::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
