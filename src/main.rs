#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_platform::run().await {
        eprintln!("exam-platform fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
