// web-server/src/main.rs
// Local development tool: runs the loopback server without a window so the
// UI can be opened in a regular browser. Logs the shared secret.

use common::models::session::SessionInfo;
use common::token::{generate_key_store_passphrase, generate_secure_token};
use common::{setup_tracing, CertificateAuthority, Config, SharedSecret, ShellError};
use web_server::LoopbackServer;

async fn run(mut config: Config) -> Result<(), ShellError> {
    // This binary is development tooling by definition
    config.dev_mode = true;
    config.validate()?;

    let authority = CertificateAuthority::new(&config.identity);
    let identity = authority.generate(&config.server.hostname)?;
    tracing::info!("The SSL cert is randomly generated on each run:");
    tracing::info!("  Certificate SHA-256 Fingerprint: {}", identity.fingerprint());
    tracing::info!("  Public Key SHA-256 Fingerprint: {}", identity.public_key_fingerprint());

    let secret = SharedSecret::new(generate_secure_token(config.auth.token_bytes));
    let passphrase = generate_key_store_passphrase(config.auth.token_bytes);
    let key_store = CertificateAuthority::to_protected_key_store(&identity, &passphrase)?;

    let session = SessionInfo::new(
        identity.fingerprint().to_string(),
        identity.public_key_fingerprint().to_string(),
        config.auth.mode,
        true,
    );
    let server = LoopbackServer::start(&config, key_store, secret.clone(), session)?;

    tracing::warn!(
        "[development mode] shared secret: {} (send it as the {} header, or ?{}= on first load)",
        secret.expose(),
        config.auth.header_name,
        config.auth.query_param
    );
    tracing::info!(
        "Open https://{}:{}/landing",
        config.server.hostname,
        server.port()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("Received SIGINT signal. Shutting down...");
    server.stop().await;
    Ok(())
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
        tracing::error!("Startup failed: {}", e);
        std::process::exit(2);
    }
}
