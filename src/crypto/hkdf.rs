//! HKDF (RFC 5869) and the TLS 1.3 HKDF-Expand-Label construction.
//!
//! Everything is built on [`HmacProvider`], so any provider that can do HMAC
//! gets HKDF for free.

use crate::buffer::Buf;
use crate::crypto::provider::HmacProvider;
use crate::types::HashAlgorithm;

/// Label prefix for TLS 1.3 (RFC 8446 Section 7.1).
const LABEL_PREFIX: &[u8] = b"tls13 ";

/// HKDF-Extract(salt, IKM) -> PRK.
///
/// An empty salt is replaced by `HashLen` zero bytes.
pub fn extract(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    salt: &[u8],
    ikm: &[u8],
    out: &mut Buf,
) -> Result<(), String> {
    let zeros = [0u8; 64];
    let salt = if salt.is_empty() {
        &zeros[..hash.output_len()]
    } else {
        salt
    };
    hmac.hmac(hash, salt, &[ikm], out)
}

/// HKDF-Expand(PRK, info, L) -> OKM.
///
/// Fails when `length` exceeds 255 * HashLen.
pub fn expand(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    prk: &[u8],
    info: &[u8],
    length: usize,
    out: &mut Buf,
) -> Result<(), String> {
    let hash_len = hash.output_len();
    if length > 255 * hash_len {
        return Err(format!(
            "HKDF-Expand length {} exceeds 255 * {}",
            length, hash_len
        ));
    }

    out.clear();
    let rounds = length.div_ceil(hash_len);
    let mut t = Buf::with_capacity(hash_len);
    let mut next = Buf::with_capacity(hash_len);

    for i in 1..=rounds {
        // T(i) = HMAC(PRK, T(i-1) | info | i)
        hmac.hmac(hash, prk, &[&t[..], info, &[i as u8][..]], &mut next)?;
        std::mem::swap(&mut t, &mut next);
        let take = (length - out.len()).min(hash_len);
        out.extend_from_slice(&t[..take]);
    }

    Ok(())
}

/// HKDF-Expand-Label(Secret, Label, Context, Length).
///
/// ```text
/// struct {
///     uint16 length = Length;
///     opaque label<7..255> = "tls13 " + Label;
///     opaque context<0..255> = Context;
/// } HkdfLabel;
/// ```
pub fn expand_label(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
    out: &mut Buf,
) -> Result<(), String> {
    let full_label_len = LABEL_PREFIX.len() + label.len();
    if full_label_len > 255 || context.len() > 255 || length > 0xFFFF {
        return Err("HKDF label out of range".to_string());
    }

    let mut info = Buf::with_capacity(4 + full_label_len + context.len());
    info.extend_from_slice(&(length as u16).to_be_bytes());
    info.push(full_label_len as u8);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    expand(hmac, hash, secret, &info, length, out)
}

/// Derive-Secret(Secret, Label, Messages) given the transcript hash of Messages.
pub fn derive_secret(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
    out: &mut Buf,
) -> Result<(), String> {
    expand_label(
        hmac,
        hash,
        secret,
        label,
        transcript_hash,
        hash.output_len(),
        out,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    pub(crate) fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn rfc5869_case_1() {
        let hmac = default_provider().hmac_provider;
        let ikm = [0x0b; 22];
        let salt = hex("000102030405060708090a0b0c");
        let info = hex("f0f1f2f3f4f5f6f7f8f9");

        let mut prk = Buf::new();
        extract(hmac, HashAlgorithm::SHA256, &salt, &ikm, &mut prk).unwrap();
        assert_eq!(
            &prk[..],
            &hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")[..]
        );

        // 42 bytes crosses one hash block boundary.
        let mut okm = Buf::new();
        expand(hmac, HashAlgorithm::SHA256, &prk, &info, 42, &mut okm).unwrap();
        assert_eq!(
            &okm[..],
            &hex(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf\
                 34007208d5b887185865"
            )[..]
        );
    }

    #[test]
    fn rfc5869_case_3_empty_salt_and_info() {
        let hmac = default_provider().hmac_provider;
        let ikm = [0x0b; 22];

        let mut prk = Buf::new();
        extract(hmac, HashAlgorithm::SHA256, &[], &ikm, &mut prk).unwrap();
        assert_eq!(
            &prk[..],
            &hex("19ef24a32c717b167f33a91d6f648bdf96596776afdb6377ac434c1c293ccb04")[..]
        );

        let mut okm = Buf::new();
        expand(hmac, HashAlgorithm::SHA256, &prk, &[], 42, &mut okm).unwrap();
        assert_eq!(
            &okm[..],
            &hex(
                "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d\
                 9d201395faa4b61a96c8"
            )[..]
        );
    }

    #[test]
    fn expand_rejects_oversized_output() {
        let hmac = default_provider().hmac_provider;
        let prk = [7u8; 32];
        let mut okm = Buf::new();
        expand(hmac, HashAlgorithm::SHA256, &prk, &[], 255 * 32, &mut okm).unwrap();
        assert_eq!(okm.len(), 255 * 32);
        assert!(expand(hmac, HashAlgorithm::SHA256, &prk, &[], 255 * 32 + 1, &mut okm).is_err());
    }

    #[test]
    fn rfc8448_early_and_derived_secret() {
        let provider = default_provider();
        let hmac = provider.hmac_provider;

        let mut early = Buf::new();
        extract(hmac, HashAlgorithm::SHA256, &[], &[0u8; 32], &mut early).unwrap();
        assert_eq!(
            &early[..],
            &hex("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")[..]
        );

        let mut empty_hash = Buf::new();
        provider
            .hash_provider
            .digest(HashAlgorithm::SHA256, &[], &mut empty_hash)
            .unwrap();
        let mut derived = Buf::new();
        derive_secret(
            hmac,
            HashAlgorithm::SHA256,
            &early,
            b"derived",
            &empty_hash,
            &mut derived,
        )
        .unwrap();
        assert_eq!(
            &derived[..],
            &hex("6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba")[..]
        );
    }
}
