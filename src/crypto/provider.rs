//! Cryptographic capability table.
//!
//! The handshake never looks algorithms up by name. Instead a [`CryptoProvider`]
//! is handed to it through [`Config`](crate::Config): a struct of static
//! references to trait objects, one per capability, listing only what the
//! backend actually implements.
//!
//! # Capabilities
//!
//! - **Ciphers** ([`SupportedCipher`]): AEAD or CBC factory keyed by bulk algorithm
//! - **Key exchange groups** ([`SupportedKxGroup`]): ephemeral (EC)DH key pairs
//! - **Signature verification** ([`SignatureVerifier`]): peer signatures over SPKI keys
//! - **Key transport** ([`KeyTransport`]): RSA encryption of the pre-master secret
//! - **Key provider** ([`KeyProvider`]): load local private keys
//! - **Secure random** ([`SecureRandom`])
//! - **Hash provider** ([`HashProvider`]): incremental hash contexts
//! - **HMAC provider** ([`HmacProvider`]): the primitive under the PRFs and HKDF
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe` so a
//! provider can be shared by every connection in the process.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

use crate::buffer::Buf;
use crate::types::{BulkCipher, CipherSuite, HashAlgorithm, NamedGroup};
use crate::types::{SignatureAlgorithm, SignatureScheme};

// ============================================================================
// Marker Trait
// ============================================================================

/// Marker trait for types that are safe to use in crypto provider components.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

// ============================================================================
// Instance Traits
// ============================================================================

/// AEAD cipher instance bound to one key.
pub trait Cipher: Send + Debug {
    /// Encrypt `data` in place and append the tag.
    fn encrypt(&mut self, data: &mut Buf, aad: &[u8], nonce: &[u8]) -> Result<(), String>;

    /// Verify and strip the tag, decrypting `data` in place.
    fn decrypt(&mut self, data: &mut Buf, aad: &[u8], nonce: &[u8]) -> Result<(), String>;
}

/// Block cipher bound to one key, run in CBC mode.
///
/// The caller owns the chaining value, so one instance serves both the
/// explicit per-record IVs of TLS 1.1+ and the chained IVs of SSL 3.0/TLS 1.0.
pub trait CbcCipher: Send + Debug {
    fn block_len(&self) -> usize;

    /// Encrypt whole blocks in place, chaining from `iv`.
    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<(), String>;

    /// Decrypt whole blocks in place, chaining from `iv`.
    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<(), String>;
}

/// Incremental hash.
pub trait HashContext: Send {
    fn update(&mut self, data: &[u8]);

    /// Digest of everything fed so far, leaving the context usable.
    fn clone_and_finalize(&self, out: &mut Buf);
}

/// A local private key.
pub trait SigningKey: CryptoSafe {
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Schemes this key can produce, in preference order.
    fn schemes(&self) -> &[SignatureScheme];

    fn sign(&self, scheme: SignatureScheme, data: &[u8], out: &mut Buf) -> Result<(), String>;

    /// Decrypt an RSA-encrypted pre-master secret.
    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Buf, String> {
        Err(format!("{:?} key cannot decrypt", self.algorithm()))
    }
}

/// An in-flight ephemeral key exchange.
pub trait ActiveKeyExchange: Send + Debug {
    /// Public value to send to the peer.
    fn pub_key(&self) -> &[u8];

    fn group(&self) -> NamedGroup;

    /// Combine with the peer's public value; writes the raw shared secret.
    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String>;
}

// ============================================================================
// Factory Traits
// ============================================================================

/// Record cipher factory for one bulk cipher.
///
/// AEAD bulk ciphers implement [`SupportedCipher::create_cipher`], block
/// ciphers [`SupportedCipher::create_cbc_cipher`].
pub trait SupportedCipher: CryptoSafe {
    fn bulk(&self) -> BulkCipher;

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String>;

    fn create_cbc_cipher(&self, _key: &[u8]) -> Result<Box<dyn CbcCipher>, String> {
        Err(format!("{:?} is not a block cipher", self.bulk()))
    }
}

/// Ephemeral key exchange for one named group.
pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Verifies peer signatures given the DER SubjectPublicKeyInfo of the peer key.
pub trait SignatureVerifier: CryptoSafe {
    fn verify_signature(
        &self,
        spki_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), String>;

    /// Key type of a SubjectPublicKeyInfo.
    fn key_algorithm(&self, spki_der: &[u8]) -> Result<SignatureAlgorithm, String>;
}

/// RSA key transport (PKCS#1 v1.5 encryption to the server key).
pub trait KeyTransport: CryptoSafe {
    fn encrypt(&self, spki_der: &[u8], plaintext: &[u8]) -> Result<Buf, String>;
}

/// Loads private keys (PKCS#8 DER).
pub trait KeyProvider: CryptoSafe {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

pub trait SecureRandom: CryptoSafe {
    fn fill(&self, dest: &mut [u8]) -> Result<(), String>;
}

pub trait HashProvider: CryptoSafe {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn HashContext>, String>;

    /// One-shot digest.
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8], out: &mut Buf) -> Result<(), String> {
        let mut ctx = self.create_hash(algorithm)?;
        ctx.update(data);
        ctx.clone_and_finalize(out);
        Ok(())
    }
}

pub trait HmacProvider: CryptoSafe {
    /// HMAC over the concatenation of `data`.
    fn hmac(
        &self,
        hash: HashAlgorithm,
        key: &[u8],
        data: &[&[u8]],
        out: &mut Buf,
    ) -> Result<(), String>;
}

// ============================================================================
// Provider
// ============================================================================

/// Cryptographic capability table handed to every handshake.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    pub ciphers: &'static [&'static dyn SupportedCipher],
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],
    pub signature_verification: &'static dyn SignatureVerifier,
    pub key_transport: &'static dyn KeyTransport,
    pub key_provider: &'static dyn KeyProvider,
    pub secure_random: &'static dyn SecureRandom,
    pub hash_provider: &'static dyn HashProvider,
    pub hmac_provider: &'static dyn HmacProvider,
}

impl CryptoProvider {
    pub fn find_cipher(&self, bulk: BulkCipher) -> Option<&'static dyn SupportedCipher> {
        self.ciphers.iter().copied().find(|c| c.bulk() == bulk)
    }

    pub fn find_kx_group(&self, group: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|g| g.name() == group)
    }

    /// Whether a suite's record protection and hash are implemented.
    pub fn supports_suite(&self, suite: CipherSuite) -> bool {
        let Some(params) = suite.params() else {
            return false;
        };
        self.find_cipher(params.bulk).is_some()
            && self.hash_provider.create_hash(params.hash).is_ok()
    }

    /// Check that the provider covers what the handshake needs at minimum.
    pub fn validate(&self) -> Result<(), String> {
        if self.ciphers.is_empty() {
            return Err("crypto provider has no ciphers".into());
        }
        if self.kx_groups.is_empty() {
            return Err("crypto provider has no key exchange groups".into());
        }
        for hash in [HashAlgorithm::SHA256, HashAlgorithm::SHA384] {
            if self.hash_provider.create_hash(hash).is_err() {
                return Err(format!("crypto provider lacks {:?}", hash));
            }
        }
        Ok(())
    }
}
