// web-server/src/tls.rs
use common::{ShellError, TlsMaterial};
use rustls::{Certificate, PrivateKey, ServerConfig};

/// Build the loopback TLS acceptor configuration from consumed key store
/// material. No client certificates are requested.
pub fn server_config(mut material: TlsMaterial) -> Result<ServerConfig, ShellError> {
    let key = PrivateKey(std::mem::take(&mut *material.private_key_der));

    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![Certificate(material.certificate_der)], key)
        .map_err(|e| ShellError::KeyStoreFailure(format!("TLS layer rejected the key store: {}", e)))
}
