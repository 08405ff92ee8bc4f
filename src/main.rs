#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gigwallet::cli::run().await
}
