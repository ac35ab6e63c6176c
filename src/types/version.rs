use std::fmt;

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;

/// Protocol versions known to the engine.
///
/// DTLS versions use the one's complement encoding on the wire.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    SSL3_0,
    TLS1_0,
    TLS1_1,
    TLS1_2,
    TLS1_3,
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0300 => ProtocolVersion::SSL3_0,
            0x0301 => ProtocolVersion::TLS1_0,
            0x0302 => ProtocolVersion::TLS1_1,
            0x0303 => ProtocolVersion::TLS1_2,
            0x0304 => ProtocolVersion::TLS1_3,
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::SSL3_0 => 0x0300,
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_1 => 0x0302,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::TLS1_3 => 0x0304,
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn is_dtls(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ProtocolVersion::Unknown(_))
    }

    /// Whether the HKDF-based key schedule and TLS 1.3 message flow apply.
    pub fn is_tls13(&self) -> bool {
        matches!(self, ProtocolVersion::TLS1_3)
    }

    /// The TLS version whose record protection and key schedule a DTLS version reuses.
    pub fn tls_equivalent(&self) -> ProtocolVersion {
        match self {
            ProtocolVersion::DTLS1_0 => ProtocolVersion::TLS1_1,
            ProtocolVersion::DTLS1_2 => ProtocolVersion::TLS1_2,
            v => *v,
        }
    }

    /// Ordering key across TLS and DTLS. `None` for unknown versions.
    pub fn rank(&self) -> Option<u8> {
        match self.tls_equivalent() {
            ProtocolVersion::SSL3_0 => Some(0),
            ProtocolVersion::TLS1_0 => Some(1),
            ProtocolVersion::TLS1_1 => Some(2),
            ProtocolVersion::TLS1_2 => Some(3),
            ProtocolVersion::TLS1_3 => Some(4),
            _ => None,
        }
    }

    pub fn newer_than(&self, other: ProtocolVersion) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    /// `legacy_version` to put in hellos and record headers.
    ///
    /// TLS 1.3 hides behind TLS 1.2 and negotiates through supported_versions.
    pub fn legacy_version(&self) -> ProtocolVersion {
        match self {
            ProtocolVersion::TLS1_3 => ProtocolVersion::TLS1_2,
            v => *v,
        }
    }

    /// Handshake header length: 4 for TLS, 12 for DTLS.
    pub fn handshake_header_len(&self) -> usize {
        if self.is_dtls() {
            12
        } else {
            4
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::SSL3_0 => f.write_str("SSLv3"),
            ProtocolVersion::TLS1_0 => f.write_str("TLSv1"),
            ProtocolVersion::TLS1_1 => f.write_str("TLSv1.1"),
            ProtocolVersion::TLS1_2 => f.write_str("TLSv1.2"),
            ProtocolVersion::TLS1_3 => f.write_str("TLSv1.3"),
            ProtocolVersion::DTLS1_0 => f.write_str("DTLSv1.0"),
            ProtocolVersion::DTLS1_2 => f.write_str("DTLSv1.2"),
            ProtocolVersion::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}
