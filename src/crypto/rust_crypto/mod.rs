//! RustCrypto cryptographic provider.
//!
//! A pure Rust backend built from crates of the
//! [RustCrypto](https://github.com/RustCrypto) organization, plus
//! `x25519-dalek` and `num-bigint` for the X25519 and finite field groups.
//!
//! ```
//! use std::sync::Arc;
//! use tlshake::{Config, crypto::rust_crypto};
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .crypto_provider(rust_crypto::default_provider())
//!         .build()
//!         .unwrap()
//! );
//! # let _ = config;
//! ```

mod cipher_suite;
mod hash;
mod hmac;
mod kx_group;
mod random;
mod sign;

use crate::crypto::provider::CryptoProvider;

/// Get the default RustCrypto-based crypto provider.
///
/// # Record protection
///
/// - AES-128-GCM and AES-256-GCM
/// - AES-128-CBC and AES-256-CBC, MACed by the record layer
///
/// # Key exchange groups
///
/// - `x25519`
/// - `secp256r1` (P-256)
/// - `secp384r1` (P-384)
/// - `ffdhe2048` (RFC 7919, also used for TLS 1.2 DHE)
///
/// # Signatures
///
/// - ECDSA with P-256/SHA-256 and P-384/SHA-384
/// - RSA PKCS#1 v1.5 with SHA-256 and SHA-384
/// - RSA-PSS (rsaEncryption key) with SHA-256
///
/// # Hashes
///
/// MD5 and SHA-1 are only present for the SSL 3.0 and TLS 1.0/1.1 PRFs and
/// handshake hashes. They are never offered as signature hashes.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        ciphers: cipher_suite::ALL_CIPHERS,
        kx_groups: kx_group::ALL_KX_GROUPS,
        signature_verification: &sign::SIGNATURE_VERIFIER,
        key_transport: &sign::KEY_TRANSPORT,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &random::SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_is_valid() {
        let provider = default_provider();
        provider.validate().unwrap();
        assert!(provider.supports_suite(crate::types::CipherSuite::TLS13_AES_128_GCM_SHA256));
        assert!(provider.supports_suite(crate::types::CipherSuite::RSA_AES128_CBC_SHA));
    }
}
