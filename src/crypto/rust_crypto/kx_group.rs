//! Key exchange group implementations using RustCrypto and num-bigint.

use num_bigint::BigUint;
use p256::{ecdh::EphemeralSecret, PublicKey as P256PublicKey};
use p384::{ecdh::EphemeralSecret as P384EphemeralSecret, PublicKey as P384PublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret as X25519Secret, PublicKey as X25519PublicKey};

use crate::buffer::Buf;
use crate::crypto::ffdhe;
use crate::crypto::provider::{ActiveKeyExchange, SupportedKxGroup};
use crate::types::NamedGroup;

/// ECDHE key exchange implementation.
enum EcdhKeyExchange {
    P256 {
        secret: EphemeralSecret,
        public_key: Buf,
    },
    P384 {
        secret: P384EphemeralSecret,
        public_key: Buf,
    },
    X25519 {
        secret: X25519Secret,
        public_key: Buf,
    },
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyExchange")
            .field("group", &self.group())
            .field("public_key_len", &self.pub_key().len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new(group: NamedGroup) -> Result<Self, String> {
        match group {
            NamedGroup::Secp256r1 => {
                let secret = EphemeralSecret::random(&mut OsRng);
                let public_key = Buf::from_slice(&P256PublicKey::from(&secret).to_sec1_bytes());
                Ok(EcdhKeyExchange::P256 { secret, public_key })
            }
            NamedGroup::Secp384r1 => {
                let secret = P384EphemeralSecret::random(&mut OsRng);
                let public_key = Buf::from_slice(&P384PublicKey::from(&secret).to_sec1_bytes());
                Ok(EcdhKeyExchange::P384 { secret, public_key })
            }
            NamedGroup::X25519 => {
                let secret = X25519Secret::random_from_rng(OsRng);
                let public_key = Buf::from_slice(X25519PublicKey::from(&secret).as_bytes());
                Ok(EcdhKeyExchange::X25519 { secret, public_key })
            }
            _ => Err(format!("Unsupported group: {:?}", group)),
        }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        match self {
            EcdhKeyExchange::P256 { public_key, .. } => public_key,
            EcdhKeyExchange::P384 { public_key, .. } => public_key,
            EcdhKeyExchange::X25519 { public_key, .. } => public_key,
        }
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        out.clear();
        match *self {
            EcdhKeyExchange::P256 { secret, .. } => {
                let peer_key = P256PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let shared_secret = secret.diffie_hellman(&peer_key);
                out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
            }
            EcdhKeyExchange::P384 { secret, .. } => {
                let peer_key = P384PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-384 public key".to_string())?;
                let shared_secret = secret.diffie_hellman(&peer_key);
                out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
            }
            EcdhKeyExchange::X25519 { secret, .. } => {
                let peer: [u8; 32] = peer_pub
                    .try_into()
                    .map_err(|_| format!("Invalid X25519 public key length: {}", peer_pub.len()))?;
                let shared_secret = secret.diffie_hellman(&X25519PublicKey::from(peer));
                if !shared_secret.was_contributory() {
                    return Err("X25519 shared secret is all zero".to_string());
                }
                out.extend_from_slice(shared_secret.as_bytes());
            }
        }
        Ok(())
    }

    fn group(&self) -> NamedGroup {
        match self {
            EcdhKeyExchange::P256 { .. } => NamedGroup::Secp256r1,
            EcdhKeyExchange::P384 { .. } => NamedGroup::Secp384r1,
            EcdhKeyExchange::X25519 { .. } => NamedGroup::X25519,
        }
    }
}

// ============================================================================
// Finite field groups (RFC 7919)
// ============================================================================

/// Private exponent size. RFC 7919 asks for at least twice the security level.
const FFDHE_EXPONENT_BYTES: usize = 32;

/// Left-pad a big-endian value to `len` bytes.
fn to_padded_bytes(value: &BigUint, len: usize) -> Buf {
    let raw = value.to_bytes_be();
    let mut out = Buf::with_capacity(len);
    out.resize(len.saturating_sub(raw.len()), 0);
    out.extend_from_slice(&raw);
    out
}

/// Finite field Diffie-Hellman over a named RFC 7919 group.
struct DhKeyExchange {
    group: NamedGroup,
    prime: &'static BigUint,
    private: BigUint,
    public_key: Buf,
}

impl std::fmt::Debug for DhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyExchange")
            .field("group", &self.group)
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

impl DhKeyExchange {
    fn new(group: NamedGroup) -> Result<Self, String> {
        let prime =
            ffdhe::prime(group).ok_or_else(|| format!("Unsupported group: {:?}", group))?;
        let mut exponent = [0u8; FFDHE_EXPONENT_BYTES];
        OsRng
            .try_fill_bytes(&mut exponent)
            .map_err(|e| format!("RNG failure: {}", e))?;
        // Never 0 or 1.
        let private = BigUint::from_bytes_be(&exponent) + 2u32;
        let public = BigUint::from(ffdhe::GENERATOR).modpow(&private, prime);
        let len = ((prime.bits() + 7) / 8) as usize;
        Ok(DhKeyExchange {
            group,
            prime,
            private,
            public_key: to_padded_bytes(&public, len),
        })
    }
}

impl ActiveKeyExchange for DhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public_key
    }

    fn group(&self) -> NamedGroup {
        self.group
    }

    /// Writes the shared secret left-padded to the size of the prime.
    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        let y = BigUint::from_bytes_be(peer_pub);
        let one = BigUint::from(1u32);
        let p_minus_one = self.prime - &one;
        if y <= one || y >= p_minus_one {
            return Err("Invalid DH public value".to_string());
        }
        let z = y.modpow(&self.private, self.prime);
        if z == one {
            return Err("DH public value in a small subgroup".to_string());
        }
        let len = ((self.prime.bits() + 7) / 8) as usize;
        out.clear();
        out.extend_from_slice(&to_padded_bytes(&z, len));
        Ok(())
    }
}

macro_rules! kx_group {
    ($name:ident, $group:expr, $ctor:ident) => {
        #[derive(Debug)]
        struct $name;

        impl SupportedKxGroup for $name {
            fn name(&self) -> NamedGroup {
                $group
            }

            fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String> {
                Ok(Box::new($ctor::new($group)?))
            }
        }
    };
}

kx_group!(X25519, NamedGroup::X25519, EcdhKeyExchange);
kx_group!(P256, NamedGroup::Secp256r1, EcdhKeyExchange);
kx_group!(P384, NamedGroup::Secp384r1, EcdhKeyExchange);
kx_group!(Ffdhe2048, NamedGroup::Ffdhe2048, DhKeyExchange);

/// Static instances of supported key exchange groups.
static KX_GROUP_X25519: X25519 = X25519;
static KX_GROUP_P256: P256 = P256;
static KX_GROUP_P384: P384 = P384;
static KX_GROUP_FFDHE2048: Ffdhe2048 = Ffdhe2048;

/// All supported key exchange groups.
pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] = &[
    &KX_GROUP_X25519,
    &KX_GROUP_P256,
    &KX_GROUP_P384,
    &KX_GROUP_FFDHE2048,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn agree(group: &dyn SupportedKxGroup) {
        let a = group.start_exchange().unwrap();
        let b = group.start_exchange().unwrap();
        let a_pub = Buf::from_slice(a.pub_key());
        let b_pub = Buf::from_slice(b.pub_key());

        let mut s1 = Buf::new();
        let mut s2 = Buf::new();
        a.complete(&b_pub, &mut s1).unwrap();
        b.complete(&a_pub, &mut s2).unwrap();
        assert_eq!(s1, s2, "{:?} shared secrets differ", group.name());
        assert!(!s1.is_empty());
    }

    #[test]
    fn all_groups_agree() {
        for g in ALL_KX_GROUPS {
            agree(*g);
        }
    }

    #[test]
    fn ffdhe2048_public_value_is_padded() {
        let kx = KX_GROUP_FFDHE2048.start_exchange().unwrap();
        assert_eq!(kx.pub_key().len(), 256);
    }

    #[test]
    fn ffdhe_rejects_degenerate_public() {
        let kx = KX_GROUP_FFDHE2048.start_exchange().unwrap();
        let mut out = Buf::new();
        assert!(kx.complete(&[1], &mut out).is_err());
    }

    #[test]
    fn x25519_rejects_bad_length() {
        let kx = KX_GROUP_X25519.start_exchange().unwrap();
        let mut out = Buf::new();
        assert!(kx.complete(&[9u8; 31], &mut out).is_err());
    }
}
