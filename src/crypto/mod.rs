//! Cryptographic building blocks of the handshake.
//!
//! Primitives come from a [`CryptoProvider`]. Everything on top of them
//! (PRFs, HKDF, the TLS 1.3 key schedule, record protection, cookies) lives
//! here and is provider independent.

pub mod cipher;
pub mod cookie;
pub mod ephemeral;
pub mod ffdhe;
pub mod hkdf;
pub mod key_schedule;
pub mod legacy;
pub mod prf;
pub mod provider;
pub mod rust_crypto;

pub use provider::{ActiveKeyExchange, CbcCipher, Cipher, CryptoProvider, CryptoSafe};
pub use provider::{HashContext, HashProvider, HmacProvider, KeyProvider, KeyTransport};
pub use provider::{SecureRandom, SignatureVerifier, SigningKey};
pub use provider::{SupportedCipher, SupportedKxGroup};

// Shared types for provider implementations.
pub use crate::types::{HashAlgorithm, NamedGroup, SignatureAlgorithm, SignatureScheme};
