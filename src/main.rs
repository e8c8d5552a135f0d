#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = cbt_attempts::run().await {
        eprintln!("cbt-attempts fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
