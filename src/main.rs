#[tokio::main]
async fn main() {
    if let Err(err) = airgap::cli::run().await {
        eprintln!("airgap: {}", err);
        std::process::exit(1);
    }
}
