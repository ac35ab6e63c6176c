use nom::bytes::complete::take;
use nom::IResult;

use super::ProtocolVersion;
use crate::buffer::Buf;
use crate::crypto::SecureRandom;

/// Tail of ServerHello.random when a TLS 1.3 capable server negotiates TLS 1.2.
pub const DOWNGRADE_TLS12: [u8; 8] = *b"DOWNGRD\x01";

/// Tail of ServerHello.random when a TLS 1.2+ capable server negotiates TLS 1.1 or below.
pub const DOWNGRADE_TLS11: [u8; 8] = *b"DOWNGRD\x00";

/// ServerHello.random marking a HelloRetryRequest (SHA-256 of "HelloRetryRequest").
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

/// The 32-byte hello random.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random {
    pub bytes: [u8; 32],
}

impl Random {
    pub fn new(rng: &dyn SecureRandom) -> Result<Self, String> {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes)?;
        Ok(Random { bytes })
    }

    /// A server random carrying the downgrade sentinel when `negotiated` is
    /// older than what the server could have done.
    pub fn server(
        rng: &dyn SecureRandom,
        max_active: ProtocolVersion,
        negotiated: ProtocolVersion,
    ) -> Result<Self, String> {
        let mut random = Self::new(rng)?;
        if let Some(tail) = downgrade_sentinel(max_active, negotiated) {
            random.bytes[24..].copy_from_slice(&tail);
        }
        Ok(random)
    }

    pub fn hello_retry_request() -> Self {
        Random {
            bytes: HELLO_RETRY_REQUEST_RANDOM,
        }
    }

    pub fn is_hello_retry_request(&self) -> bool {
        self.bytes == HELLO_RETRY_REQUEST_RANDOM
    }

    /// Client-side check of a ServerHello random.
    ///
    /// True when the server random carries a downgrade sentinel that the
    /// client's own maximum version says should not be there.
    pub fn is_version_downgrade(
        &self,
        client_max: ProtocolVersion,
        negotiated: ProtocolVersion,
    ) -> bool {
        let tail = &self.bytes[24..];
        let client_max = client_max.tls_equivalent();
        let negotiated = negotiated.tls_equivalent();

        if client_max.is_tls13() && !negotiated.is_tls13() {
            return tail == DOWNGRADE_TLS12 || tail == DOWNGRADE_TLS11;
        }
        if client_max == ProtocolVersion::TLS1_2
            && ProtocolVersion::TLS1_2.newer_than(negotiated)
        {
            return tail == DOWNGRADE_TLS11;
        }
        false
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(32usize)(input)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok((input, Random { bytes }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.bytes);
    }
}

fn downgrade_sentinel(max_active: ProtocolVersion, negotiated: ProtocolVersion) -> Option<[u8; 8]> {
    let max_active = max_active.tls_equivalent();
    let negotiated = negotiated.tls_equivalent();
    if negotiated.is_tls13() || !max_active.newer_than(negotiated) {
        return None;
    }
    if max_active.is_tls13() && negotiated == ProtocolVersion::TLS1_2 {
        Some(DOWNGRADE_TLS12)
    } else if ProtocolVersion::TLS1_2.newer_than(negotiated)
        && !ProtocolVersion::TLS1_2.newer_than(max_active)
    {
        Some(DOWNGRADE_TLS11)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    #[test]
    fn tls12_downgrade_from_tls13_capable_server() {
        let provider = default_provider();
        let random = Random::server(
            provider.secure_random,
            ProtocolVersion::TLS1_3,
            ProtocolVersion::TLS1_2,
        )
        .unwrap();
        assert_eq!(&random.bytes[24..], b"DOWNGRD\x01");
        assert!(random.is_version_downgrade(ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2));
    }

    #[test]
    fn tls11_downgrade_from_tls12_capable_server() {
        let provider = default_provider();
        let random = Random::server(
            provider.secure_random,
            ProtocolVersion::TLS1_2,
            ProtocolVersion::TLS1_1,
        )
        .unwrap();
        assert_eq!(&random.bytes[24..], b"DOWNGRD\x00");
        assert!(random.is_version_downgrade(ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_1));
        assert!(random.is_version_downgrade(ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_1));
    }

    #[test]
    fn no_sentinel_at_max_version() {
        let provider = default_provider();
        let random = Random::server(
            provider.secure_random,
            ProtocolVersion::TLS1_2,
            ProtocolVersion::TLS1_2,
        )
        .unwrap();
        assert!(!random.is_version_downgrade(ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_2));
        // A TLS 1.2 only client has no reason to look for the TLS 1.3 sentinel.
        let mut forged = random;
        forged.bytes[24..].copy_from_slice(&DOWNGRADE_TLS12);
        assert!(!forged.is_version_downgrade(ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_2));
    }
}
