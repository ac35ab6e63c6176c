//! Running transcript of handshake messages.
//!
//! Messages are kept raw since the hash is not known until the cipher suite
//! is negotiated, and TLS 1.2 client CertificateVerify and SSL 3.0 Finished
//! need the messages themselves rather than a digest.
//!
//! An inbound message is first *held*. The message handler decides when it
//! counts: Finished must be verified over the transcript without the message,
//! while keys derived after ServerHello need the message included. Calling
//! [`TranscriptHash::utilize`] folds the held message in; the dispatcher calls
//! it again once the handler succeeded, which is a no-op if the handler
//! already did.

use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::crypto::HashProvider;
use crate::types::{HandshakeType, HashAlgorithm, ProtocolVersion};
use crate::Error;

pub(crate) struct TranscriptHash {
    hashes: &'static dyn HashProvider,
    messages: Buf,
    pending: Option<Buf>,
}

impl TranscriptHash {
    pub fn new(hashes: &'static dyn HashProvider) -> Self {
        TranscriptHash {
            hashes,
            messages: Buf::new(),
            pending: None,
        }
    }

    /// Append an encoded message, header included.
    pub fn update(&mut self, message: &[u8]) {
        self.utilize();
        self.messages.extend_from_slice(message);
    }

    /// Hold an inbound message until [`TranscriptHash::utilize`].
    pub fn hold(&mut self, message: &[u8]) {
        self.utilize();
        self.pending = Some(Buf::from_slice(message));
    }

    pub fn utilize(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.messages.extend_from_slice(&pending);
        }
    }

    /// Drop the held message; it never becomes part of the transcript.
    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    /// Everything utilized so far.
    pub fn raw(&self) -> &[u8] {
        &self.messages
    }

    /// Start over. DTLS drops the first ClientHello and HelloVerifyRequest.
    pub fn reset(&mut self) {
        self.messages.zeroize();
        self.messages.clear();
        self.pending = None;
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Result<Buf, Error> {
        hash_with(self.hashes, algorithm, &self.messages)
    }

    /// The handshake hash of `version`: MD5 || SHA-1 before TLS 1.2, the
    /// suite hash after.
    pub fn digest(&self, version: ProtocolVersion, suite_hash: HashAlgorithm) -> Result<Buf, Error> {
        if ProtocolVersion::TLS1_2.newer_than(version) {
            let mut out = self.hash(HashAlgorithm::MD5)?;
            out.extend_from_slice(&self.hash(HashAlgorithm::SHA1)?);
            Ok(out)
        } else {
            self.hash(suite_hash)
        }
    }

    /// Digest of the transcript followed by `extra`, without keeping `extra`.
    pub fn digest_with(&self, algorithm: HashAlgorithm, extra: &[u8]) -> Result<Buf, Error> {
        let mut ctx = self
            .hashes
            .create_hash(algorithm)
            .map_err(|e| Error::CryptoError(format!("transcript hash: {}", e)))?;
        ctx.update(&self.messages);
        ctx.update(extra);
        let mut out = Buf::new();
        ctx.clone_and_finalize(&mut out);
        Ok(out)
    }

    /// Replace the utilized messages (ClientHello1) by a synthetic
    /// `message_hash` message, as after a HelloRetryRequest:
    ///
    /// ```text
    /// message_hash(254) 00 00 Hash.length || Hash(ClientHello1)
    /// ```
    ///
    /// A held message stays held.
    pub fn replace_with_message_hash(&mut self, algorithm: HashAlgorithm) -> Result<(), Error> {
        let hash = self.hash(algorithm)?;
        self.messages.zeroize();
        self.messages.clear();
        self.messages.extend_from_slice(&[
            HandshakeType::MessageHash.as_u8(),
            0,
            0,
            hash.len() as u8,
        ]);
        self.messages.extend_from_slice(&hash);
        Ok(())
    }

    /// Zero the retained messages once the handshake is over.
    pub fn finish(&mut self) {
        self.reset();
    }
}

impl Drop for TranscriptHash {
    fn drop(&mut self) {
        self.messages.zeroize();
    }
}

fn hash_with(
    hashes: &dyn HashProvider,
    algorithm: HashAlgorithm,
    data: &[u8],
) -> Result<Buf, Error> {
    let mut out = Buf::new();
    hashes
        .digest(algorithm, data, &mut out)
        .map_err(|e| Error::CryptoError(format!("transcript hash: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    fn transcript() -> TranscriptHash {
        TranscriptHash::new(default_provider().hash_provider)
    }

    #[test]
    fn held_message_counts_after_utilize() {
        let mut t = transcript();
        t.update(b"client hello");
        t.hold(b"server hello");
        assert_eq!(t.raw(), b"client hello");

        let before = t.hash(HashAlgorithm::SHA256).unwrap();
        t.utilize();
        t.utilize();
        assert_eq!(t.raw(), b"client helloserver hello");
        assert_ne!(t.hash(HashAlgorithm::SHA256).unwrap(), before);
    }

    #[test]
    fn discarded_message_never_counts() {
        let mut t = transcript();
        t.hold(b"hello request");
        t.discard_pending();
        t.utilize();
        assert!(t.raw().is_empty());
    }

    #[test]
    fn legacy_digest_is_md5_and_sha1() {
        let mut t = transcript();
        t.update(b"abc");
        assert_eq!(t.digest(ProtocolVersion::TLS1_0, HashAlgorithm::SHA256).unwrap().len(), 36);
        assert_eq!(t.digest(ProtocolVersion::DTLS1_0, HashAlgorithm::SHA256).unwrap().len(), 36);
        assert_eq!(t.digest(ProtocolVersion::TLS1_2, HashAlgorithm::SHA384).unwrap().len(), 48);
    }

    #[test]
    fn digest_with_extra_matches_update() {
        let mut t = transcript();
        t.update(b"one");
        let peek = t.digest_with(HashAlgorithm::SHA256, b"two").unwrap();
        assert_eq!(t.raw(), b"one");
        t.update(b"two");
        assert_eq!(t.hash(HashAlgorithm::SHA256).unwrap(), peek);
    }

    #[test]
    fn message_hash_replaces_client_hello() {
        let mut t = transcript();
        t.update(b"client hello 1");
        let ch1_hash = t.hash(HashAlgorithm::SHA256).unwrap();
        t.hold(b"hello retry request");

        t.replace_with_message_hash(HashAlgorithm::SHA256).unwrap();
        assert_eq!(&t.raw()[..4], &[254, 0, 0, 32]);
        assert_eq!(&t.raw()[4..], &ch1_hash[..]);

        t.utilize();
        assert!(t.raw().ends_with(b"hello retry request"));
    }
}
