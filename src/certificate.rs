//! Certificates and the hooks the handshake needs around them.
//!
//! Chain validation itself is not done here. The handshake hands the peer
//! chain to a [`CertificateValidator`] and only ever looks inside the leaf to
//! find its public key.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use der::{Decode, Encode};
use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use pkcs8::EncodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate as X509Certificate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("invalid certificate format")]
    InvalidFormat,

    #[error("certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("certificate rejected: {0}")]
    Rejected(String),
}

/// A certificate chain with the private key of its leaf.
#[derive(Clone)]
pub struct Identity {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 DER private key of the leaf.
    pub private_key: Vec<u8>,
}

impl Identity {
    pub fn new(chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        Identity { chain, private_key }
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.chain.first().map(|c| &c[..])
    }

    /// SHA-256 fingerprint of the leaf.
    pub fn fingerprint(&self) -> Vec<u8> {
        self.leaf().map(calculate_fingerprint).unwrap_or_default()
    }

    /// The leaf fingerprint as colon separated hex, e.g. "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// Generate a self-signed ECDSA P-256 certificate.
pub fn generate_self_signed_certificate(name: &str) -> Result<Identity, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;

    let mut params = CertificateParams::new(vec![name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "tlshake".to_string());
    distinguished_name.push(DnType::CommonName, name.to_string());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;

    Ok(Identity {
        chain: vec![cert_der],
        private_key: cert.serialize_private_key_der(),
    })
}

/// Generate a self-signed RSA certificate signed with PKCS#1 v1.5 SHA-256.
///
/// RSA identities are what the RSA and DHE_RSA key exchanges need.
pub fn generate_self_signed_rsa_certificate(
    name: &str,
    bits: usize,
) -> Result<Identity, CertificateError> {
    let failed = |e: &dyn fmt::Display| CertificateError::GenerationFailed(e.to_string());

    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits).map_err(|e| failed(&e))?;
    let spki = SubjectPublicKeyInfoOwned::from_key(RsaPublicKey::from(&private_key))
        .map_err(|e| failed(&e))?;
    let key_der = private_key.to_pkcs8_der().map_err(|e| failed(&e))?;

    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
    let subject = Name::from_str(&format!("CN={},O=tlshake", name)).map_err(|e| failed(&e))?;
    let validity =
        Validity::from_now(Duration::from_secs(365 * 24 * 3600)).map_err(|e| failed(&e))?;

    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(1u32),
        validity,
        subject,
        spki,
        &signer,
    )
    .map_err(|e| failed(&e))?;
    let cert = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| failed(&e))?;
    let cert_der = cert.to_der().map_err(|e| failed(&e))?;

    Ok(Identity {
        chain: vec![cert_der],
        private_key: key_der.as_bytes().to_vec(),
    })
}

/// DER SubjectPublicKeyInfo of a certificate.
pub fn spki_from_der(cert_der: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let cert = X509Certificate::from_der(cert_der).map_err(|_| CertificateError::InvalidFormat)?;
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|_| CertificateError::InvalidFormat)
}

/// SHA-256 over the DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

/// Decides whether a peer certificate chain is acceptable.
///
/// Called with the chain exactly as received, leaf first. An error fails the
/// handshake with `bad_certificate`.
pub trait CertificateValidator: Send + Sync + fmt::Debug {
    fn validate(&self, chain: &[Vec<u8>]) -> Result<(), CertificateError>;
}

/// Accepts any chain with at least a parseable leaf.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyCertificate;

impl CertificateValidator for AcceptAnyCertificate {
    fn validate(&self, chain: &[Vec<u8>]) -> Result<(), CertificateError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CertificateError::Rejected("empty chain".into()))?;
        X509Certificate::from_der(leaf).map_err(|_| CertificateError::InvalidFormat)?;
        Ok(())
    }
}

/// Accepts a leaf whose SHA-256 fingerprint is in a pinned set.
#[derive(Debug, Default, Clone)]
pub struct PinnedFingerprints {
    trusted: Vec<Vec<u8>>,
}

impl PinnedFingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trust(mut self, fingerprint: Vec<u8>) -> Self {
        self.trusted.push(fingerprint);
        self
    }
}

impl CertificateValidator for PinnedFingerprints {
    fn validate(&self, chain: &[Vec<u8>]) -> Result<(), CertificateError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CertificateError::Rejected("empty chain".into()))?;
        let fingerprint = calculate_fingerprint(leaf);
        if self.trusted.iter().any(|t| *t == fingerprint) {
            Ok(())
        } else {
            Err(CertificateError::Rejected(format!(
                "untrusted fingerprint {}",
                format_fingerprint(&fingerprint)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_certificate() {
        let id = generate_self_signed_certificate("localhost").unwrap();
        assert_eq!(id.chain.len(), 1);
        assert!(!id.private_key.is_empty());
        assert_eq!(id.fingerprint().len(), 32);

        let spki = spki_from_der(id.leaf().unwrap()).unwrap();
        assert!(!spki.is_empty());
        AcceptAnyCertificate.validate(&id.chain).unwrap();
    }

    #[test]
    fn fingerprint_formatting() {
        assert_eq!(format_fingerprint(&[0xAF, 0x12, 0xF6, 0x38, 0x2A]), "AF:12:F6:38:2A");

        let id = generate_self_signed_certificate("peer").unwrap();
        let formatted = id.fingerprint_str();
        assert_eq!(formatted.len(), 95);
        for segment in formatted.split(':') {
            assert!(u8::from_str_radix(segment, 16).is_ok());
        }
    }

    #[test]
    fn pinned_fingerprints() {
        let a = generate_self_signed_certificate("a").unwrap();
        let b = generate_self_signed_certificate("b").unwrap();
        let pins = PinnedFingerprints::new().trust(a.fingerprint());
        pins.validate(&a.chain).unwrap();
        assert!(pins.validate(&b.chain).is_err());
        assert!(pins.validate(&[]).is_err());
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert_eq!(spki_from_der(&[0x30, 0x03, 0x01]), Err(CertificateError::InvalidFormat));
        assert!(AcceptAnyCertificate.validate(&[vec![1, 2, 3]]).is_err());
    }
}
