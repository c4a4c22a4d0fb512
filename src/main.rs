#[tokio::main]
async fn main() -> anyhow::Result<()> {
    maternal_gateway_lib::run().await
}
