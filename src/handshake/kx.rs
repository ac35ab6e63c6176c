//! Key exchange material.
//!
//! A [`Possession`] is what this side holds (an ephemeral key pair, the RSA
//! key of the certificate, a PSK). [`Credentials`] is what the peer supplied
//! for the same exchange. A secret can only be computed from a pair of the
//! same kind and group.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::crypto::{ActiveKeyExchange, CryptoProvider, SecureRandom, SigningKey};
use crate::types::{GroupKind, KeyExchangeAlgorithm, NamedGroup, ProtocolVersion};
use crate::Error;

/// Length of an RSA-transported pre-master secret.
pub const PRE_MASTER_SECRET_LEN: usize = 48;

pub(crate) enum Possession {
    /// Certificate key of an RSA key-transport server.
    Rsa(Arc<dyn SigningKey>),
    Dh(Box<dyn ActiveKeyExchange>),
    Ecdhe(Box<dyn ActiveKeyExchange>),
    Xdh(Box<dyn ActiveKeyExchange>),
    Psk { identity: Buf, secret: Buf },
}

impl std::fmt::Debug for Possession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Possession::Rsa(key) => write!(f, "Rsa({:?})", key.algorithm()),
            Possession::Dh(kx) | Possession::Ecdhe(kx) | Possession::Xdh(kx) => {
                write!(f, "{:?}", kx.group())
            }
            Possession::Psk { identity, .. } => write!(f, "Psk({:?})", identity),
        }
    }
}

impl Possession {
    /// A fresh ephemeral key pair for `group`.
    pub fn generate(provider: &CryptoProvider, group: NamedGroup) -> Result<Self, Error> {
        let kx_group = provider
            .find_kx_group(group)
            .ok_or_else(|| Error::handshake_failure(format!("no implementation of {:?}", group)))?;
        let kx = kx_group
            .start_exchange()
            .map_err(|e| Error::CryptoError(format!("{:?} key generation: {}", group, e)))?;

        match group.kind() {
            Some(GroupKind::Ffdhe) => Ok(Possession::Dh(kx)),
            Some(GroupKind::Ecdhe) => Ok(Possession::Ecdhe(kx)),
            Some(GroupKind::Xdh) => Ok(Possession::Xdh(kx)),
            None => Err(Error::handshake_failure(format!("unknown group {:?}", group))),
        }
    }

    pub fn group(&self) -> Option<NamedGroup> {
        match self {
            Possession::Dh(kx) | Possession::Ecdhe(kx) | Possession::Xdh(kx) => Some(kx.group()),
            _ => None,
        }
    }

    /// Public value to send to the peer.
    pub fn public(&self) -> Option<&[u8]> {
        match self {
            Possession::Dh(kx) | Possession::Ecdhe(kx) | Possession::Xdh(kx) => Some(kx.pub_key()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Credentials {
    /// SubjectPublicKeyInfo of an RSA key-transport server.
    Rsa { spki: Vec<u8> },
    Dh { group: NamedGroup, public: Buf },
    Ecdhe { group: NamedGroup, public: Buf },
    Xdh { group: NamedGroup, public: Buf },
    Psk { identity: Buf },
}

impl Credentials {
    /// Peer public value for `group`.
    pub fn key_share(group: NamedGroup, public: &[u8]) -> Result<Self, Error> {
        let public = Buf::from_slice(public);
        match group.kind() {
            Some(GroupKind::Ffdhe) => Ok(Credentials::Dh { group, public }),
            Some(GroupKind::Ecdhe) => Ok(Credentials::Ecdhe { group, public }),
            Some(GroupKind::Xdh) => Ok(Credentials::Xdh { group, public }),
            None => Err(Error::illegal_parameter(format!(
                "key share for unknown group {:?}",
                group
            ))),
        }
    }

    pub fn group(&self) -> Option<NamedGroup> {
        match self {
            Credentials::Dh { group, .. }
            | Credentials::Ecdhe { group, .. }
            | Credentials::Xdh { group, .. } => Some(*group),
            _ => None,
        }
    }
}

/// Remove and return the ephemeral possession for `group`.
pub(crate) fn take_possession(
    possessions: &mut Vec<Possession>,
    group: NamedGroup,
) -> Option<Possession> {
    let index = possessions.iter().position(|p| p.group() == Some(group))?;
    Some(possessions.remove(index))
}

/// Fail unless key exchange `kx` has an implementation for `version`.
pub(crate) fn check_supported(kx: KeyExchangeAlgorithm, version: ProtocolVersion) -> Result<(), Error> {
    let tls13 = version.is_tls13();
    let ok = match kx {
        KeyExchangeAlgorithm::Tls13 => tls13,
        KeyExchangeAlgorithm::Rsa
        | KeyExchangeAlgorithm::DheRsa
        | KeyExchangeAlgorithm::EcdheEcdsa
        | KeyExchangeAlgorithm::EcdheRsa => !tls13,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::handshake_failure(format!(
            "no {:?} key exchange for {}",
            kx, version
        )))
    }
}

/// The shared secret of a matching (possession, credentials) pair.
///
/// Before TLS 1.3 leading zero bytes of a finite field secret are stripped
/// (RFC 5246 Section 8.1.2); TLS 1.3 keeps them (RFC 8446 Section 7.4.1).
pub(crate) fn shared_secret(
    possession: Possession,
    credentials: &Credentials,
    version: ProtocolVersion,
) -> Result<Buf, Error> {
    let (kx, public, strip) = match (possession, credentials) {
        (Possession::Dh(kx), Credentials::Dh { group, public }) if kx.group() == *group => {
            (kx, public, !version.is_tls13())
        }
        (Possession::Ecdhe(kx), Credentials::Ecdhe { group, public })
        | (Possession::Xdh(kx), Credentials::Xdh { group, public })
            if kx.group() == *group =>
        {
            (kx, public, false)
        }
        (p, c) => {
            return Err(Error::handshake_failure(format!(
                "no key exchange between {:?} and {:?}",
                p,
                c.group()
            )))
        }
    };

    let group = kx.group();
    let mut secret = Buf::new();
    kx.complete(public, &mut secret)
        .map_err(|e| Error::illegal_parameter(format!("{:?} key exchange: {}", group, e)))?;

    if strip {
        strip_leading_zeros(&mut secret);
    }
    Ok(secret)
}

fn strip_leading_zeros(secret: &mut Buf) {
    let zeros = secret.iter().take_while(|b| **b == 0).count();
    if zeros > 0 {
        let rest = secret[zeros..].to_vec();
        secret.zeroize();
        secret.clear();
        secret.extend_from_slice(&rest);
    }
}

/// A new RSA pre-master secret: `client_version || random[46]`.
pub(crate) fn new_premaster(
    rng: &dyn SecureRandom,
    client_version: ProtocolVersion,
) -> Result<Buf, Error> {
    let mut pms = Buf::new();
    pms.resize(PRE_MASTER_SECRET_LEN, 0);
    rng.fill(&mut pms[2..])
        .map_err(|e| Error::CryptoError(format!("pre-master secret: {}", e)))?;
    pms[..2].copy_from_slice(&client_version.as_u16().to_be_bytes());
    Ok(pms)
}

pub(crate) fn encrypt_premaster(
    provider: &CryptoProvider,
    spki: &[u8],
    pms: &[u8],
) -> Result<Buf, Error> {
    provider
        .key_transport
        .encrypt(spki, pms)
        .map_err(|e| Error::CryptoError(format!("pre-master secret encryption: {}", e)))
}

/// Decrypt an RSA pre-master secret.
///
/// Any failure (bad padding, wrong length, wrong version) yields a random
/// secret instead of an error, so the handshake fails at Finished without
/// revealing which check failed (RFC 5246 Section 7.4.7.1).
pub(crate) fn decrypt_premaster(
    key: &dyn SigningKey,
    rng: &dyn SecureRandom,
    ciphertext: &[u8],
    client_version: ProtocolVersion,
) -> Result<Buf, Error> {
    let fallback = new_premaster(rng, client_version)?;

    let Ok(decrypted) = key.decrypt(ciphertext) else {
        debug!("RSA pre-master secret did not decrypt, using random");
        return Ok(fallback);
    };

    let version = client_version.as_u16().to_be_bytes();
    let good_len = decrypted.len() == PRE_MASTER_SECRET_LEN;
    let good_version = good_len && bool::from(decrypted[..2].ct_eq(&version));
    if good_len && good_version {
        Ok(decrypted)
    } else {
        debug!("RSA pre-master secret malformed, using random");
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed_rsa_certificate, spki_from_der};
    use crate::crypto::rust_crypto::default_provider;

    #[test]
    fn x25519_agreement() {
        let provider = default_provider();
        let a = Possession::generate(&provider, NamedGroup::X25519).unwrap();
        let b = Possession::generate(&provider, NamedGroup::X25519).unwrap();
        assert!(matches!(a, Possession::Xdh(_)));

        let a_cred = Credentials::key_share(NamedGroup::X25519, a.public().unwrap()).unwrap();
        let b_cred = Credentials::key_share(NamedGroup::X25519, b.public().unwrap()).unwrap();

        let s1 = shared_secret(a, &b_cred, ProtocolVersion::TLS1_3).unwrap();
        let s2 = shared_secret(b, &a_cred, ProtocolVersion::TLS1_3).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);
    }

    #[test]
    fn mismatched_pair_is_handshake_failure() {
        let provider = default_provider();
        let a = Possession::generate(&provider, NamedGroup::X25519).unwrap();
        let p256 = Possession::generate(&provider, NamedGroup::Secp256r1).unwrap();
        let cred = Credentials::key_share(NamedGroup::Secp256r1, p256.public().unwrap()).unwrap();

        let err = shared_secret(a, &cred, ProtocolVersion::TLS1_2).unwrap_err();
        assert_eq!(
            err.alert_description(),
            crate::alert::AlertDescription::HandshakeFailure
        );
    }

    #[test]
    fn take_possession_by_group() {
        let provider = default_provider();
        let mut possessions = vec![
            Possession::generate(&provider, NamedGroup::X25519).unwrap(),
            Possession::generate(&provider, NamedGroup::Secp384r1).unwrap(),
        ];
        let p = take_possession(&mut possessions, NamedGroup::Secp384r1).unwrap();
        assert_eq!(p.group(), Some(NamedGroup::Secp384r1));
        assert_eq!(possessions.len(), 1);
        assert!(take_possession(&mut possessions, NamedGroup::Secp384r1).is_none());
    }

    #[test]
    fn leading_zeros_stripped() {
        let mut secret = Buf::from_slice(&[0, 0, 7, 0, 9]);
        strip_leading_zeros(&mut secret);
        assert_eq!(&secret[..], &[7, 0, 9]);
    }

    #[test]
    fn kx_version_pairing() {
        check_supported(KeyExchangeAlgorithm::Tls13, ProtocolVersion::TLS1_3).unwrap();
        check_supported(KeyExchangeAlgorithm::EcdheRsa, ProtocolVersion::DTLS1_2).unwrap();
        assert!(check_supported(KeyExchangeAlgorithm::Rsa, ProtocolVersion::TLS1_3).is_err());
        assert!(check_supported(KeyExchangeAlgorithm::Tls13, ProtocolVersion::TLS1_2).is_err());
    }

    #[test]
    fn rsa_premaster_transport() {
        let provider = default_provider();
        let identity = generate_self_signed_rsa_certificate("rsa", 1024).unwrap();
        let key: Arc<dyn SigningKey> = Arc::from(
            provider
                .key_provider
                .load_private_key(&identity.private_key)
                .unwrap(),
        );
        let spki = spki_from_der(identity.leaf().unwrap()).unwrap();
        let rng = provider.secure_random;

        let pms = new_premaster(rng, ProtocolVersion::TLS1_2).unwrap();
        assert_eq!(&pms[..2], &[3, 3]);
        let ct = encrypt_premaster(&provider, &spki, &pms).unwrap();

        let ok = decrypt_premaster(key.as_ref(), rng, &ct, ProtocolVersion::TLS1_2).unwrap();
        assert_eq!(ok, pms);

        // Version rollback and garbage both give an unrelated random secret.
        let rolled = decrypt_premaster(key.as_ref(), rng, &ct, ProtocolVersion::TLS1_1).unwrap();
        assert_eq!(rolled.len(), PRE_MASTER_SECRET_LEN);
        assert_ne!(rolled, pms);
        let garbage = decrypt_premaster(key.as_ref(), rng, &[1; 128], ProtocolVersion::TLS1_2).unwrap();
        assert_eq!(&garbage[..2], &[3, 3]);
        assert_ne!(garbage, pms);
    }
}
