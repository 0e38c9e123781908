// desktop-shell/src/main.rs
// Desktop shell - main.rs

use common::{setup_tracing, Config, ShellError};
use desktop_shell::{HeadlessEngine, SessionBootstrap};

async fn run(config: Config) -> Result<(), ShellError> {
    tracing::info!(
        "Starting desktop shell ({} auth{})",
        config.auth.mode,
        if config.dev_mode { ", development mode" } else { "" }
    );

    let engine = HeadlessEngine::new(config.window.clone());
    let session = SessionBootstrap::new(config).start(engine).await?;

    tracing::info!("Session running, loopback server on port {}", session.server_addr().port());
    session.run_until_shutdown().await
}

#[actix_web::main]
async fn main() {
    // Setup tracing
    setup_tracing();

    // Load configuration
    let config = Config::from_env();

    if let Err(e) = run(config).await {
        if e.is_fatal() {
            tracing::error!("Fatal error, aborting: {}", e);
            std::process::exit(1);
        }
        tracing::error!("Desktop shell failed: {}", e);
        std::process::exit(2);
    }
}
