//! Hash implementations using RustCrypto.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::buffer::Buf;
use crate::crypto::provider::{HashContext, HashProvider};
use crate::types::HashAlgorithm;

/// Hash context implementation using RustCrypto.
#[derive(Clone)]
enum RustCryptoHashContext {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

fn finalize_into<D: Digest + Clone>(ctx: &D, out: &mut Buf) {
    let digest = ctx.clone().finalize();
    out.clear();
    out.extend_from_slice(&digest);
}

impl HashContext for RustCryptoHashContext {
    fn update(&mut self, data: &[u8]) {
        match self {
            RustCryptoHashContext::Md5(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha1(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha256(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha384(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha512(ctx) => Digest::update(ctx, data),
        }
    }

    fn clone_and_finalize(&self, out: &mut Buf) {
        match self {
            RustCryptoHashContext::Md5(ctx) => finalize_into(ctx, out),
            RustCryptoHashContext::Sha1(ctx) => finalize_into(ctx, out),
            RustCryptoHashContext::Sha256(ctx) => finalize_into(ctx, out),
            RustCryptoHashContext::Sha384(ctx) => finalize_into(ctx, out),
            RustCryptoHashContext::Sha512(ctx) => finalize_into(ctx, out),
        }
    }
}

/// Hash provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoHashProvider;

impl HashProvider for RustCryptoHashProvider {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn HashContext>, String> {
        let ctx = match algorithm {
            HashAlgorithm::MD5 => RustCryptoHashContext::Md5(Md5::new()),
            HashAlgorithm::SHA1 => RustCryptoHashContext::Sha1(Sha1::new()),
            HashAlgorithm::SHA256 => RustCryptoHashContext::Sha256(Sha256::new()),
            HashAlgorithm::SHA384 => RustCryptoHashContext::Sha384(Sha384::new()),
            HashAlgorithm::SHA512 => RustCryptoHashContext::Sha512(Sha512::new()),
        };
        Ok(Box::new(ctx))
    }
}

/// Static instance of the hash provider.
pub(super) static HASH_PROVIDER: RustCryptoHashProvider = RustCryptoHashProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sha256() {
        let mut out = Buf::new();
        HASH_PROVIDER
            .digest(HashAlgorithm::SHA256, b"", &mut out)
            .unwrap();
        assert_eq!(
            &out[..4],
            &[0xe3, 0xb0, 0xc4, 0x42],
            "SHA-256 of the empty string"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut ctx = HASH_PROVIDER.create_hash(HashAlgorithm::SHA384).unwrap();
        ctx.update(b"hello ");
        let mut partial = Buf::new();
        ctx.clone_and_finalize(&mut partial);
        ctx.update(b"world");
        let mut full = Buf::new();
        ctx.clone_and_finalize(&mut full);

        let mut expected = Buf::new();
        HASH_PROVIDER
            .digest(HashAlgorithm::SHA384, b"hello world", &mut expected)
            .unwrap();
        assert_eq!(full, expected);
        assert_ne!(partial, full);
    }
}
