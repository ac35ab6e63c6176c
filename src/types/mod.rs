//! Protocol constants and small value types shared by messages and the handshake.

mod cipher_suite;
mod content;
mod group;
mod random;
mod signature;
mod version;

pub use cipher_suite::{BulkCipher, CipherSuite, KeyExchangeAlgorithm, MacAlgorithm, SuiteParams};
pub use content::{ContentType, HandshakeType};
pub use group::{GroupKind, NamedGroup};
pub use random::{Random, DOWNGRADE_TLS11, DOWNGRADE_TLS12, HELLO_RETRY_REQUEST_RANDOM};
pub use signature::{HashAlgorithm, SignatureAlgorithm, SignatureScheme};
pub use version::ProtocolVersion;

use nom::IResult;

use crate::buffer::Buf;
use crate::codec;

/// psk_key_exchange_modes values (RFC 8446 4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PskKeyExchangeMode {
    /// PSK-only key establishment.
    PskKe,
    /// PSK with (EC)DHE key establishment.
    PskDheKe,
    Unknown(u8),
}

impl PskKeyExchangeMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PskKeyExchangeMode::PskKe,
            1 => PskKeyExchangeMode::PskDheKe,
            _ => PskKeyExchangeMode::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PskKeyExchangeMode::PskKe => 0,
            PskKeyExchangeMode::PskDheKe => 1,
            PskKeyExchangeMode::Unknown(value) => *value,
        }
    }
}

/// Legacy session id, 0 to 32 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionId(Vec<u8>);

impl SessionId {
    pub const MAX_LEN: usize = 32;

    pub fn empty() -> Self {
        SessionId(Vec::new())
    }

    pub fn try_new(bytes: &[u8]) -> Option<Self> {
        (bytes.len() <= Self::MAX_LEN).then(|| SessionId(bytes.to_vec()))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SessionId> {
        let (rest, bytes) = codec::vec8(input)?;
        if bytes.len() > Self::MAX_LEN {
            return Err(codec::malformed(input));
        }
        Ok((rest, SessionId(bytes.to_vec())))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}
