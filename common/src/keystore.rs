// common/src/keystore.rs
use std::fs;
use std::io::Write;
use std::path::Path;

use openssl::pkcs12::Pkcs12;
use tempfile::TempPath;
use zeroize::Zeroizing;

use crate::errors::ShellError;
use crate::identity::Identity;

/// Passphrase-protected PKCS#12 file handing an identity to the server's TLS
/// layer. The file is removed when the store is consumed or dropped.
pub struct ProtectedKeyStore {
    path: TempPath,
    passphrase: Zeroizing<String>,
}

/// Byte buffer wiped on drop
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Decrypted key material, ready for a TLS acceptor
pub struct TlsMaterial {
    pub certificate_der: Vec<u8>,
    /// PKCS#8 DER
    pub private_key_der: SecretBytes,
}

impl ProtectedKeyStore {
    pub(crate) fn create(identity: &Identity, passphrase: &str) -> Result<Self, ShellError> {
        let pkcs12 = Pkcs12::builder()
            .name(identity.hostname())
            .pkey(identity.private_key())
            .cert(identity.certificate())
            .build2(passphrase)
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to build PKCS#12: {}", e)))?;
        let der = pkcs12
            .to_der()
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to encode PKCS#12: {}", e)))?;

        let mut file = tempfile::Builder::new()
            .prefix("keystore")
            .suffix(".p12")
            .tempfile()
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to create key store file: {}", e)))?;
        file.write_all(&der)
            .and_then(|_| file.flush())
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to write key store file: {}", e)))?;

        let path = file.into_temp_path();
        tracing::debug!("Wrote transient key store to {}", path.display());

        Ok(Self {
            path,
            passphrase: Zeroizing::new(passphrase.to_string()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decrypt the container, then delete it from disk
    pub fn consume(self) -> Result<TlsMaterial, ShellError> {
        let der = Zeroizing::new(
            fs::read(&self.path)
                .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to read key store file: {}", e)))?,
        );

        let display_path = self.path.display().to_string();
        self.path
            .close()
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to delete key store file: {}", e)))?;
        tracing::debug!("Removed transient key store {}", display_path);

        let parsed = Pkcs12::from_der(&der)
            .and_then(|p| p.parse2(&self.passphrase))
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to open key store: {}", e)))?;

        let pkey = parsed
            .pkey
            .ok_or_else(|| ShellError::KeyStoreFailure("key store has no private key".to_string()))?;
        let cert = parsed
            .cert
            .ok_or_else(|| ShellError::KeyStoreFailure("key store has no certificate".to_string()))?;

        let private_key_der = Zeroizing::new(
            pkey.private_key_to_pkcs8()
                .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to encode private key: {}", e)))?,
        );
        let certificate_der = cert
            .to_der()
            .map_err(|e| ShellError::KeyStoreFailure(format!("Failed to encode certificate: {}", e)))?;

        Ok(TlsMaterial {
            certificate_der,
            private_key_der,
        })
    }
}

impl std::fmt::Debug for ProtectedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedKeyStore")
            .field("path", &self.path.display().to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::identity::CertificateAuthority;
    use crate::token::generate_key_store_passphrase;

    fn identity() -> Identity {
        CertificateAuthority::new(&Config::default().identity)
            .generate("localhost")
            .unwrap()
    }

    #[test]
    fn test_consume_returns_same_certificate_and_deletes_file() {
        let identity = identity();
        let passphrase = generate_key_store_passphrase(32);
        let store = CertificateAuthority::to_protected_key_store(&identity, &passphrase).unwrap();
        let path = store.path().to_path_buf();
        assert!(path.exists());

        let material = store.consume().unwrap();
        assert!(!path.exists());
        assert_eq!(material.certificate_der, identity.certificate_der());
        assert!(!material.private_key_der.is_empty());
    }

    #[test]
    fn test_file_is_encrypted_with_passphrase() {
        let identity = identity();
        let store = CertificateAuthority::to_protected_key_store(&identity, "correct horse").unwrap();
        let der = fs::read(store.path()).unwrap();
        assert!(Pkcs12::from_der(&der).unwrap().parse2("wrong horse").is_err());
    }

    #[test]
    fn test_drop_removes_file() {
        let identity = identity();
        let store = CertificateAuthority::to_protected_key_store(&identity, "pass").unwrap();
        let path = store.path().to_path_buf();
        drop(store);
        assert!(!path.exists());
    }
}
