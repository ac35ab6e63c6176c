//! HMAC using RustCrypto.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::buffer::Buf;
use crate::crypto::provider::HmacProvider;
use crate::types::HashAlgorithm;

fn compute<M: Mac + KeyInit>(key: &[u8], data: &[&[u8]], out: &mut Buf) -> Result<(), String> {
    let mut mac =
        <M as Mac>::new_from_slice(key).map_err(|_| "Invalid HMAC key length".to_string())?;
    for part in data {
        mac.update(part);
    }
    out.clear();
    out.extend_from_slice(&mac.finalize().into_bytes());
    Ok(())
}

/// HMAC provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac(
        &self,
        hash: HashAlgorithm,
        key: &[u8],
        data: &[&[u8]],
        out: &mut Buf,
    ) -> Result<(), String> {
        match hash {
            HashAlgorithm::MD5 => compute::<Hmac<Md5>>(key, data, out),
            HashAlgorithm::SHA1 => compute::<Hmac<Sha1>>(key, data, out),
            HashAlgorithm::SHA256 => compute::<Hmac<Sha256>>(key, data, out),
            HashAlgorithm::SHA384 => compute::<Hmac<Sha384>>(key, data, out),
            HashAlgorithm::SHA512 => compute::<Hmac<Sha512>>(key, data, out),
        }
    }
}

/// Static instance of the HMAC provider.
pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc4231_case_2() {
        // Key "Jefe", data "what do ya want for nothing?"
        let mut out = Buf::new();
        HMAC_PROVIDER
            .hmac(
                HashAlgorithm::SHA256,
                b"Jefe",
                &[b"what do ya want ", b"for nothing?"],
                &mut out,
            )
            .unwrap();
        assert_eq!(
            &out[..8],
            &[0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e]
        );
    }
}
