/// qm - Quadmart chat terminal client
use quadmart_core::cli_app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    cli_app::run(args).await
}
