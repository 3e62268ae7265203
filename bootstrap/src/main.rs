use mirror_bootstrap::{RuntimeConfig, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    run(RuntimeConfig::default()).await?;
    Ok(())
}
