//! Pseudo-random functions of SSL 3.0 through TLS 1.2.

use crate::buffer::Buf;
use crate::crypto::provider::{HashProvider, HmacProvider};
use crate::types::{HashAlgorithm, ProtocolVersion};

/// The PRF a legacy protocol version derives its secrets with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    /// SSL 3.0 MD5/SHA-1 construction. Takes no label.
    Ssl3,
    /// TLS 1.0 and 1.1: P_MD5 XOR P_SHA-1 over the two halves of the secret.
    Tls10,
    /// TLS 1.2: P_hash with the cipher suite's hash.
    Tls12(HashAlgorithm),
}

impl Prf {
    pub fn for_version(version: ProtocolVersion, suite_hash: HashAlgorithm) -> Prf {
        match version.tls_equivalent() {
            ProtocolVersion::SSL3_0 => Prf::Ssl3,
            ProtocolVersion::TLS1_0 | ProtocolVersion::TLS1_1 => Prf::Tls10,
            _ => Prf::Tls12(suite_hash),
        }
    }

    /// PRF(secret, label, seed) truncated to `len` bytes.
    pub fn derive(
        &self,
        hmac: &dyn HmacProvider,
        hashes: &dyn HashProvider,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        len: usize,
        out: &mut Buf,
    ) -> Result<(), String> {
        match self {
            Prf::Ssl3 => ssl3_prf(hashes, secret, seed, len, out),
            Prf::Tls10 => prf_tls10(hmac, secret, label, seed, len, out),
            Prf::Tls12(hash) => prf_tls12(hmac, *hash, secret, label, seed, len, out),
        }
    }
}

/// P_hash(secret, seed) from RFC 5246 Section 5.
fn p_hash(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    seed: &[&[u8]],
    len: usize,
    out: &mut Buf,
) -> Result<(), String> {
    out.clear();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a = Buf::new();
    hmac.hmac(hash, secret, seed, &mut a)?;

    let mut block = Buf::new();
    let mut next_a = Buf::new();
    while out.len() < len {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(seed.len() + 1);
        parts.push(&a[..]);
        parts.extend_from_slice(seed);
        hmac.hmac(hash, secret, &parts, &mut block)?;

        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);

        if out.len() < len {
            hmac.hmac(hash, secret, &[&a[..]], &mut next_a)?;
            std::mem::swap(&mut a, &mut next_a);
        }
    }
    Ok(())
}

/// PRF for TLS 1.2 as specified in RFC 5246 Section 5.
///
/// PRF(secret, label, seed) = P_<hash>(secret, label + seed)
pub fn prf_tls12(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    len: usize,
    out: &mut Buf,
) -> Result<(), String> {
    p_hash(hmac, hash, secret, &[label.as_bytes(), seed], len, out)
}

/// PRF for TLS 1.0/1.1 (RFC 2246 Section 5).
///
/// The secret is split in two halves (sharing the middle byte when odd),
/// and P_MD5 of the first is XORed with P_SHA-1 of the second.
pub fn prf_tls10(
    hmac: &dyn HmacProvider,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    len: usize,
    out: &mut Buf,
) -> Result<(), String> {
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut md5 = Buf::new();
    p_hash(hmac, HashAlgorithm::MD5, s1, &[label.as_bytes(), seed], len, &mut md5)?;
    p_hash(hmac, HashAlgorithm::SHA1, s2, &[label.as_bytes(), seed], len, out)?;

    for (o, m) in out.iter_mut().zip(md5.iter()) {
        *o ^= m;
    }
    Ok(())
}

/// SSL 3.0 key derivation.
///
/// ```text
/// MD5(secret + SHA('A' + secret + seed)) +
/// MD5(secret + SHA('BB' + secret + seed)) +
/// MD5(secret + SHA('CCC' + secret + seed)) + [...]
/// ```
pub fn ssl3_prf(
    hashes: &dyn HashProvider,
    secret: &[u8],
    seed: &[u8],
    len: usize,
    out: &mut Buf,
) -> Result<(), String> {
    // 26 letters of 16 bytes each is the most this can produce.
    if len > 26 * 16 {
        return Err(format!("SSL 3.0 key derivation cannot produce {} bytes", len));
    }

    out.clear();
    let mut inner = Buf::new();
    let mut block = Buf::new();
    let mut round = 0u8;
    while out.len() < len {
        let letter = b'A' + round;
        round += 1;

        let mut sha = hashes.create_hash(HashAlgorithm::SHA1)?;
        for _ in 0..round {
            sha.update(&[letter]);
        }
        sha.update(secret);
        sha.update(seed);
        sha.clone_and_finalize(&mut inner);

        let mut md5 = hashes.create_hash(HashAlgorithm::MD5)?;
        md5.update(secret);
        md5.update(&inner);
        md5.clone_and_finalize(&mut block);

        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
    }
    Ok(())
}
