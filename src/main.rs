#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dofler_console::run().await
}
