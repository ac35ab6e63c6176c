//! Signing, verification and RSA key transport using RustCrypto.

use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384};
use signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};

use super::super::{KeyProvider, KeyTransport, SignatureVerifier, SigningKey};
use crate::buffer::Buf;
use crate::types::{SignatureAlgorithm, SignatureScheme};

/// ECDSA signing key implementation.
enum EcdsaSigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EcdsaSigningKey::P256(_) => f.debug_tuple("EcdsaSigningKey::P256").finish(),
            EcdsaSigningKey::P384(_) => f.debug_tuple("EcdsaSigningKey::P384").finish(),
        }
    }
}

impl SigningKey for EcdsaSigningKey {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ecdsa
    }

    fn schemes(&self) -> &[SignatureScheme] {
        match self {
            EcdsaSigningKey::P256(_) => &[SignatureScheme::ECDSA_SECP256R1_SHA256],
            EcdsaSigningKey::P384(_) => &[SignatureScheme::ECDSA_SECP384R1_SHA384],
        }
    }

    fn sign(&self, scheme: SignatureScheme, data: &[u8], out: &mut Buf) -> Result<(), String> {
        out.clear();
        match (self, scheme) {
            (EcdsaSigningKey::P256(key), SignatureScheme::ECDSA_SECP256R1_SHA256) => {
                let sig: p256::ecdsa::Signature =
                    key.try_sign(data).map_err(|_| "Signing failed".to_string())?;
                out.extend_from_slice(sig.to_der().as_bytes());
            }
            (EcdsaSigningKey::P384(key), SignatureScheme::ECDSA_SECP384R1_SHA384) => {
                let sig: p384::ecdsa::Signature =
                    key.try_sign(data).map_err(|_| "Signing failed".to_string())?;
                out.extend_from_slice(sig.to_der().as_bytes());
            }
            _ => return Err(format!("Key cannot sign with {:?}", scheme)),
        }
        Ok(())
    }
}

/// RSA private key, usable for signatures and pre-master secret decryption.
struct RsaSigningKey {
    key: RsaPrivateKey,
}

impl std::fmt::Debug for RsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigningKey").finish_non_exhaustive()
    }
}

impl SigningKey for RsaSigningKey {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Rsa
    }

    fn schemes(&self) -> &[SignatureScheme] {
        &[
            SignatureScheme::RSA_PSS_RSAE_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
        ]
    }

    fn sign(&self, scheme: SignatureScheme, data: &[u8], out: &mut Buf) -> Result<(), String> {
        let sig = match scheme {
            SignatureScheme::RSA_PKCS1_SHA256 => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.key.clone());
                signer.try_sign(data).map(|s| s.to_vec())
            }
            SignatureScheme::RSA_PKCS1_SHA384 => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha384>::new(self.key.clone());
                signer.try_sign(data).map(|s| s.to_vec())
            }
            SignatureScheme::RSA_PSS_RSAE_SHA256 => {
                let signer = rsa::pss::BlindedSigningKey::<Sha256>::new(self.key.clone());
                signer
                    .try_sign_with_rng(&mut OsRng, data)
                    .map(|s| s.to_vec())
            }
            _ => return Err(format!("Key cannot sign with {:?}", scheme)),
        }
        .map_err(|e| format!("RSA signing failed: {}", e))?;
        out.clear();
        out.extend_from_slice(&sig);
        Ok(())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Buf, String> {
        self.key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map(Buf::from)
            .map_err(|e| format!("RSA decryption failed: {}", e))
    }
}

/// Key provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key)));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key)));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(RsaSigningKey { key }));
        }
        Err("Unsupported private key format (expected PKCS#8 ECDSA P-256/P-384 or RSA)".into())
    }
}

enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    fn from_spki(spki_der: &[u8]) -> Result<Self, String> {
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
            return Ok(PublicKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
            return Ok(PublicKey::P384(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_der(spki_der) {
            return Ok(PublicKey::Rsa(key));
        }
        Err("Unsupported public key type".into())
    }
}

/// Signature verifier implementation.
#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_signature(
        &self,
        spki_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), String> {
        let key = PublicKey::from_spki(spki_der)?;
        let bad = |_| "Signature verification failed".to_string();
        match (key, scheme) {
            (PublicKey::P256(vk), SignatureScheme::ECDSA_SECP256R1_SHA256) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| "Invalid ECDSA signature encoding".to_string())?;
                vk.verify(data, &sig).map_err(bad)
            }
            (PublicKey::P384(vk), SignatureScheme::ECDSA_SECP384R1_SHA384) => {
                let sig = p384::ecdsa::Signature::from_der(signature)
                    .map_err(|_| "Invalid ECDSA signature encoding".to_string())?;
                vk.verify(data, &sig).map_err(bad)
            }
            (PublicKey::Rsa(pk), SignatureScheme::RSA_PKCS1_SHA256) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(bad)?;
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(pk)
                    .verify(data, &sig)
                    .map_err(bad)
            }
            (PublicKey::Rsa(pk), SignatureScheme::RSA_PKCS1_SHA384) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(bad)?;
                rsa::pkcs1v15::VerifyingKey::<Sha384>::new(pk)
                    .verify(data, &sig)
                    .map_err(bad)
            }
            (PublicKey::Rsa(pk), SignatureScheme::RSA_PSS_RSAE_SHA256) => {
                let sig = rsa::pss::Signature::try_from(signature).map_err(bad)?;
                rsa::pss::VerifyingKey::<Sha256>::new(pk)
                    .verify(data, &sig)
                    .map_err(bad)
            }
            (_, scheme) => Err(format!("Key does not match signature scheme {:?}", scheme)),
        }
    }

    fn key_algorithm(&self, spki_der: &[u8]) -> Result<SignatureAlgorithm, String> {
        Ok(match PublicKey::from_spki(spki_der)? {
            PublicKey::P256(_) | PublicKey::P384(_) => SignatureAlgorithm::Ecdsa,
            PublicKey::Rsa(_) => SignatureAlgorithm::Rsa,
        })
    }
}

/// RSA key transport implementation.
#[derive(Debug)]
pub(super) struct RustCryptoKeyTransport;

impl KeyTransport for RustCryptoKeyTransport {
    fn encrypt(&self, spki_der: &[u8], plaintext: &[u8]) -> Result<Buf, String> {
        let key = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|_| "Server key is not an RSA key".to_string())?;
        key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map(Buf::from)
            .map_err(|e| format!("RSA encryption failed: {}", e))
    }
}

/// Static instances.
pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;
pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;
pub(super) static KEY_TRANSPORT: RustCryptoKeyTransport = RustCryptoKeyTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs8::{EncodePrivateKey, EncodePublicKey};

    #[test]
    fn ecdsa_sign_verify() {
        let sk = p256::ecdsa::SigningKey::random(&mut OsRng);
        let key_der = sk.to_pkcs8_der().unwrap();
        let spki = sk.verifying_key().to_public_key_der().unwrap();

        let key = KEY_PROVIDER.load_private_key(key_der.as_bytes()).unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::Ecdsa);

        let mut sig = Buf::new();
        key.sign(SignatureScheme::ECDSA_SECP256R1_SHA256, b"signed data", &mut sig)
            .unwrap();

        SIGNATURE_VERIFIER
            .verify_signature(
                spki.as_bytes(),
                b"signed data",
                &sig,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            )
            .unwrap();
        assert!(SIGNATURE_VERIFIER
            .verify_signature(
                spki.as_bytes(),
                b"other data",
                &sig,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            )
            .is_err());
        // Scheme must match the key.
        assert!(key
            .sign(SignatureScheme::ECDSA_SECP384R1_SHA384, b"x", &mut sig)
            .is_err());
    }

    #[test]
    fn rsa_transport_and_signature() {
        let sk = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let spki = RsaPublicKey::from(&sk).to_public_key_der().unwrap();
        let key_der = sk.to_pkcs8_der().unwrap();
        let key = KEY_PROVIDER.load_private_key(key_der.as_bytes()).unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::Rsa);

        let ct = KEY_TRANSPORT.encrypt(spki.as_bytes(), b"premaster").unwrap();
        assert_eq!(&key.decrypt(&ct).unwrap()[..], b"premaster");

        let mut sig = Buf::new();
        key.sign(SignatureScheme::RSA_PKCS1_SHA256, b"params", &mut sig)
            .unwrap();
        SIGNATURE_VERIFIER
            .verify_signature(spki.as_bytes(), b"params", &sig, SignatureScheme::RSA_PKCS1_SHA256)
            .unwrap();
        assert_eq!(
            SIGNATURE_VERIFIER.key_algorithm(spki.as_bytes()).unwrap(),
            SignatureAlgorithm::Rsa
        );
    }
}
