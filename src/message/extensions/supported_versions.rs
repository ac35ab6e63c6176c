//! Supported Versions extension (RFC 8446 Section 4.2.1)
//!
//! ```text
//! struct {
//!     select (Handshake.msg_type) {
//!         case client_hello:
//!              ProtocolVersion versions<2..254>;
//!
//!         case server_hello: /* and HelloRetryRequest */
//!              ProtocolVersion selected_version;
//!     };
//! } SupportedVersions;
//! ```

use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::message::ExtensionType;
use crate::types::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersionsClientHello {
    pub versions: Vec<ProtocolVersion>,
}

impl ExtensionData for SupportedVersionsClientHello {
    const TYPE: ExtensionType = ExtensionType::SupportedVersions;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut list) = codec::vec8(input)?;
        if list.len() < 2 || list.len() % 2 != 0 {
            return Err(codec::malformed(input));
        }
        let mut versions = Vec::with_capacity(list.len() / 2);
        while !list.is_empty() {
            let (tail, version) = ProtocolVersion::parse(list)?;
            versions.push(version);
            list = tail;
        }
        Ok((rest, SupportedVersionsClientHello { versions }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U8);
        for version in &self.versions {
            version.serialize(output);
        }
        codec::finish_vec(output, mark)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedVersionsServerHello {
    pub selected_version: ProtocolVersion,
}

impl ExtensionData for SupportedVersionsServerHello {
    const TYPE: ExtensionType = ExtensionType::SupportedVersions;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, selected_version) = ProtocolVersion::parse(input)?;
        Ok((rest, SupportedVersionsServerHello { selected_version }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.selected_version.serialize(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_MESSAGE: &[u8] = &[
        0x04, // Versions length
        0x03, 0x04, // TLS 1.3
        0x03, 0x03, // TLS 1.2
    ];

    #[test]
    fn client_roundtrip() {
        let ext = SupportedVersionsClientHello {
            versions: vec![ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2],
        };

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], CLIENT_MESSAGE);

        let (rest, parsed) = SupportedVersionsClientHello::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn server_selected_version() {
        let ext = SupportedVersionsServerHello {
            selected_version: ProtocolVersion::TLS1_3,
        };
        let raw = ext.to_extension().unwrap();
        assert_eq!(&raw.data[..], &[0x03, 0x04]);
        assert_eq!(SupportedVersionsServerHello::from_extension(&raw).unwrap(), ext);
    }

    #[test]
    fn empty_list_rejected() {
        assert!(SupportedVersionsClientHello::parse(&[0x00]).is_err());
    }
}
