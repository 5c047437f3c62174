#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hec_log_shipper::app::main().await
}
