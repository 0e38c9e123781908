// desktop-shell/src/pinning.rs
// Engine-side certificate pinning.
//
// The loopback server's certificate is self-signed and never chains to a
// public root. Trust comes only from byte-for-byte equality with the
// certificate this process generated. There is no fallback to CA validation
// and no warning mode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, CertificateError, ServerName};

/// Outcome of checking one handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerdict {
    Accept,
    /// Not the loopback host; nothing else is ever trusted
    RejectHost,
    /// Loopback host, but not the pinned certificate
    RejectCertificate,
}

/// Accepts exactly one certificate for exactly one hostname.
///
/// Runs on the engine's thread during the handshake and only compares bytes
/// in memory.
#[derive(Debug, Clone)]
pub struct TrustPinner {
    expected_host: String,
    pinned_der: Arc<[u8]>,
    rejections: Arc<AtomicUsize>,
}

impl TrustPinner {
    pub fn new(expected_host: &str, pinned_der: &[u8]) -> Self {
        Self {
            expected_host: expected_host.to_ascii_lowercase(),
            pinned_der: Arc::from(pinned_der),
            rejections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn for_identity(identity: &common::Identity) -> Self {
        Self::new(identity.hostname(), identity.certificate_der())
    }

    pub fn expected_host(&self) -> &str {
        &self.expected_host
    }

    pub fn check(&self, host: &str, presented_der: &[u8]) -> PinVerdict {
        let verdict = if !host.eq_ignore_ascii_case(&self.expected_host) {
            PinVerdict::RejectHost
        } else if presented_der == &*self.pinned_der {
            PinVerdict::Accept
        } else {
            PinVerdict::RejectCertificate
        };

        if verdict != PinVerdict::Accept {
            self.rejections.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                host = host,
                verdict = ?verdict,
                presented_fingerprint = %common::CertificateAuthority::fingerprint_of(presented_der),
                "Refusing TLS connection: certificate is not the pinned loopback certificate"
            );
        }
        verdict
    }

    /// Number of handshakes refused so far
    pub fn rejections(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }
}

impl ServerCertVerifier for TrustPinner {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let host = match server_name {
            ServerName::DnsName(name) => name.as_ref().to_string(),
            ServerName::IpAddress(ip) => ip.to_string(),
            _ => String::new(),
        };

        // Handshake signatures are still checked by rustls against the key in
        // the accepted certificate.
        match self.check(&host, &end_entity.0) {
            PinVerdict::Accept => Ok(ServerCertVerified::assertion()),
            PinVerdict::RejectHost => Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)),
            PinVerdict::RejectCertificate => Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
        }
    }
}
