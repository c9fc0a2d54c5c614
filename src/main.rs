use srs::config::Config;
use srs::http::HttpProtocol;
use srs::server::Server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let mut server = Server::new(cfg, HttpProtocol);
    server.start()?;

    // The engine runs on its own threads; a small runtime only waits for the signal.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;
    tracing::info!("Shutdown signal received");

    server.stop();
    Ok(())
}
