// common/src/identity.rs
// Ephemeral TLS identity for the loopback server.
//
// A fresh RSA key pair and self-signed certificate are minted on every run,
// so nothing reusable ever ships with the binary. Clients cannot chain this
// certificate to a public root; they trust it by pinning the exact bytes.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Name, X509};
use sha2::{Digest, Sha256};

use crate::config::IdentityConfig;
use crate::errors::ShellError;
use crate::keystore::ProtectedKeyStore;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_BITS: i32 = 159;

/// Self-signed key pair and certificate bound to one hostname.
///
/// The private key never leaves this crate except inside a
/// [`ProtectedKeyStore`].
pub struct Identity {
    hostname: String,
    private_key: PKey<Private>,
    certificate: X509,
    certificate_der: Vec<u8>,
    fingerprint: String,
    public_key_fingerprint: String,
}

impl Identity {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// DER encoding of the certificate, the exact bytes clients pin
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Lowercase hex SHA-256 of the certificate DER
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Lowercase hex SHA-256 of the DER SubjectPublicKeyInfo
    pub fn public_key_fingerprint(&self) -> &str {
        &self.public_key_fingerprint
    }

    pub(crate) fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("hostname", &self.hostname)
            .field("fingerprint", &self.fingerprint)
            .field("public_key_fingerprint", &self.public_key_fingerprint)
            .finish_non_exhaustive()
    }
}

/// Mints per-process identities for the loopback host
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    key_bits: u32,
    validity_days: u32,
}

impl CertificateAuthority {
    pub fn new(settings: &IdentityConfig) -> Self {
        Self {
            key_bits: settings.key_bits,
            validity_days: settings.validity_days,
        }
    }

    /// Generate an RSA key pair and a self-signed end-entity certificate for
    /// `hostname`, valid from now for the configured number of days.
    pub fn generate(&self, hostname: &str) -> Result<Identity, ShellError> {
        let rsa = Rsa::generate(self.key_bits)
            .map_err(|e| ShellError::CryptoFailure(format!("Failed to generate RSA keypair: {}", e)))?;
        let private_key = PKey::from_rsa(rsa)
            .map_err(|e| ShellError::CryptoFailure(format!("Failed to create private key: {}", e)))?;

        let certificate = self
            .self_sign(hostname, &private_key)
            .map_err(|e| ShellError::CryptoFailure(format!("Failed to sign certificate: {}", e)))?;

        let certificate_der = certificate
            .to_der()
            .map_err(|e| ShellError::CryptoFailure(format!("Failed to encode certificate: {}", e)))?;
        let fingerprint = Self::fingerprint_of(&certificate_der);

        let public_key_der = certificate
            .public_key()
            .and_then(|key| key.public_key_to_der())
            .map_err(|e| ShellError::CryptoFailure(format!("Failed to encode public key: {}", e)))?;
        let public_key_fingerprint = Self::fingerprint_of(&public_key_der);

        Ok(Identity {
            hostname: hostname.to_string(),
            private_key,
            certificate,
            certificate_der,
            fingerprint,
            public_key_fingerprint,
        })
    }

    fn self_sign(&self, hostname: &str, private_key: &PKey<Private>) -> Result<X509, openssl::error::ErrorStack> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let mut serial = BigNum::new()?;
        serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
        builder.set_serial_number(&*serial.to_asn1_integer()?)?;

        let mut name_builder = X509Name::builder()?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, hostname)?;
        let name = name_builder.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&*Asn1Time::days_from_now(self.validity_days)?)?;
        builder.set_pubkey(private_key)?;

        // End-entity only, never a CA
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

        let san = SubjectAlternativeName::new()
            .dns(hostname)
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(san)?;

        builder.sign(private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// SHA-256 fingerprint of an identity's certificate, for operators to
    /// compare by eye. Not used for protocol-level verification.
    pub fn fingerprint(identity: &Identity) -> String {
        Self::fingerprint_of(identity.certificate_der())
    }

    pub fn fingerprint_of(certificate_der: &[u8]) -> String {
        hex::encode(Sha256::digest(certificate_der))
    }

    /// Package the identity into a passphrase-protected temporary file that
    /// is deleted once consumed or dropped.
    pub fn to_protected_key_store(
        identity: &Identity,
        passphrase: &str,
    ) -> Result<ProtectedKeyStore, ShellError> {
        ProtectedKeyStore::create(identity, passphrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn authority() -> CertificateAuthority {
        CertificateAuthority::new(&Config::default().identity)
    }

    #[test]
    fn test_generate_localhost_identity() {
        let identity = authority().generate("localhost").unwrap();
        let cert = identity.certificate();

        assert_eq!(identity.hostname(), "localhost");
        let cn = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "localhost");

        let sans = cert.subject_alt_names().unwrap();
        assert!(sans.iter().any(|n| n.dnsname() == Some("localhost")));

        // Self-signed: issuer is the subject and its own key verifies it
        assert_eq!(
            cert.subject_name().to_der().unwrap(),
            cert.issuer_name().to_der().unwrap()
        );
        assert!(cert.verify(&cert.public_key().unwrap()).unwrap());
        assert!(cert.public_key().unwrap().bits() >= 2048);
    }

    #[test]
    fn test_end_entity_extensions() {
        let identity = authority().generate("localhost").unwrap();
        let text = String::from_utf8(identity.certificate().to_text().unwrap()).unwrap();

        assert!(text.contains("CA:FALSE"));
        assert!(text.contains("Digital Signature, Key Encipherment"));
        assert!(!text.contains("Certificate Sign"));
        assert!(text.contains("TLS Web Server Authentication, TLS Web Client Authentication"));
        assert!(text.contains("DNS:localhost"));
    }

    #[test]
    fn test_validity_starts_now_and_lasts_a_year() {
        let identity = authority().generate("localhost").unwrap();
        let cert = identity.certificate();
        let now = Asn1Time::days_from_now(0).unwrap();
        let diff = cert.not_before().diff(&now).unwrap();
        assert_eq!(diff.days, 0);
        let span = cert.not_before().diff(cert.not_after()).unwrap();
        assert_eq!(span.days, 365);
    }

    #[test]
    fn test_fingerprint_is_deterministic_hex() {
        let identity = authority().generate("localhost").unwrap();
        let fingerprint = CertificateAuthority::fingerprint(&identity);
        assert_eq!(fingerprint, CertificateAuthority::fingerprint(&identity));
        assert_eq!(fingerprint, identity.fingerprint());
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_public_key_fingerprint_matches_private_key() {
        let identity = authority().generate("localhost").unwrap();
        let spki = identity.private_key().public_key_to_der().unwrap();

        assert_eq!(identity.public_key_fingerprint(), CertificateAuthority::fingerprint_of(&spki));
        assert_eq!(identity.public_key_fingerprint().len(), 64);
        assert_ne!(identity.public_key_fingerprint(), identity.fingerprint());
    }

    #[test]
    fn test_independent_identities_differ() {
        let ca = authority();
        let a = ca.generate("localhost").unwrap();
        let b = ca.generate("localhost").unwrap();
        assert_ne!(a.certificate_der(), b.certificate_der());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_debug_omits_key_material() {
        let identity = authority().generate("localhost").unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(identity.fingerprint()));
        assert!(!debug.contains("PRIVATE"));
    }
}
