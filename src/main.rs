#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duochat::run().await
}
