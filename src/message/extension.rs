use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, finish_vec, start_vec, CodecError, LengthWidth};

/// One extension as it appears on the wire, payload still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Buf,
}

impl Extension {
    pub fn new(extension_type: ExtensionType, data: Buf) -> Self {
        Extension {
            extension_type,
            data,
        }
    }

    /// An extension with an empty payload.
    pub fn empty(extension_type: ExtensionType) -> Self {
        Self::new(extension_type, Buf::new())
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, extension_type) = ExtensionType::parse(input)?;
        let (input, extension_length) = be_u16(input)?;
        let (input, data) = take(extension_length)(input)?;

        Ok((
            input,
            Extension {
                extension_type,
                data: Buf::from_slice(data),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        output.extend_from_slice(&self.extension_type.as_u16().to_be_bytes());
        codec::put_vec16(output, &self.data)
    }
}

/// The extensions block of a hello or EncryptedExtensions.
///
/// An absent block and an empty block both parse to an empty list.
pub fn parse_extensions(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
    if input.is_empty() {
        return Ok((input, Vec::new()));
    }
    let (rest, block) = codec::vec16(input)?;
    let mut extensions = Vec::new();
    let mut remaining = block;
    while !remaining.is_empty() {
        let (tail, extension) = Extension::parse(remaining)?;
        extensions.push(extension);
        remaining = tail;
    }
    Ok((rest, extensions))
}

/// Write an extensions block. Nothing is written for an empty list when
/// `omit_empty` is set, as in pre-TLS 1.2 style hellos.
pub fn serialize_extensions(
    extensions: &[Extension],
    omit_empty: bool,
    output: &mut Buf,
) -> Result<(), CodecError> {
    if extensions.is_empty() && omit_empty {
        return Ok(());
    }
    let mark = start_vec(output, LengthWidth::U16);
    for ext in extensions {
        ext.serialize(output)?;
    }
    finish_vec(output, mark)
}

pub fn find_extension(extensions: &[Extension], t: ExtensionType) -> Option<&Extension> {
    extensions.iter().find(|e| e.extension_type == t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionType {
    ServerName,
    StatusRequest,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    ApplicationLayerProtocolNegotiation,
    Padding,
    EncryptThenMac,
    ExtendedMasterSecret,
    SessionTicket,
    PreSharedKey,
    EarlyData,
    SupportedVersions,
    Cookie,
    PskKeyExchangeModes,
    CertificateAuthorities,
    PostHandshakeAuth,
    SignatureAlgorithmsCert,
    KeyShare,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => ExtensionType::ServerName,
            0x0005 => ExtensionType::StatusRequest,
            0x000A => ExtensionType::SupportedGroups,
            0x000B => ExtensionType::EcPointFormats,
            0x000D => ExtensionType::SignatureAlgorithms,
            0x0010 => ExtensionType::ApplicationLayerProtocolNegotiation,
            0x0015 => ExtensionType::Padding,
            0x0016 => ExtensionType::EncryptThenMac,
            0x0017 => ExtensionType::ExtendedMasterSecret,
            0x0023 => ExtensionType::SessionTicket,
            0x0029 => ExtensionType::PreSharedKey,
            0x002A => ExtensionType::EarlyData,
            0x002B => ExtensionType::SupportedVersions,
            0x002C => ExtensionType::Cookie,
            0x002D => ExtensionType::PskKeyExchangeModes,
            0x002F => ExtensionType::CertificateAuthorities,
            0x0031 => ExtensionType::PostHandshakeAuth,
            0x0032 => ExtensionType::SignatureAlgorithmsCert,
            0x0033 => ExtensionType::KeyShare,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0x0000,
            ExtensionType::StatusRequest => 0x0005,
            ExtensionType::SupportedGroups => 0x000A,
            ExtensionType::EcPointFormats => 0x000B,
            ExtensionType::SignatureAlgorithms => 0x000D,
            ExtensionType::ApplicationLayerProtocolNegotiation => 0x0010,
            ExtensionType::Padding => 0x0015,
            ExtensionType::EncryptThenMac => 0x0016,
            ExtensionType::ExtendedMasterSecret => 0x0017,
            ExtensionType::SessionTicket => 0x0023,
            ExtensionType::PreSharedKey => 0x0029,
            ExtensionType::EarlyData => 0x002A,
            ExtensionType::SupportedVersions => 0x002B,
            ExtensionType::Cookie => 0x002C,
            ExtensionType::PskKeyExchangeModes => 0x002D,
            ExtensionType::CertificateAuthorities => 0x002F,
            ExtensionType::PostHandshakeAuth => 0x0031,
            ExtensionType::SignatureAlgorithmsCert => 0x0032,
            ExtensionType::KeyShare => 0x0033,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ExtensionType> {
        let (input, value) = be_u16(input)?;
        Ok((input, ExtensionType::from_u16(value)))
    }
}
