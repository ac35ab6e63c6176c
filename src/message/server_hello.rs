//! ServerHello and HelloRetryRequest (RFC 8446 Section 4.1.3)
//!
//! A HelloRetryRequest is a ServerHello whose random is the fixed
//! SHA-256("HelloRetryRequest") value.

use nom::number::complete::be_u8;
use nom::IResult;

use super::extension::{find_extension, parse_extensions, serialize_extensions};
use super::extensions::ExtensionData;
use super::{Extension, ExtensionType};
use crate::buffer::Buf;
use crate::codec::CodecError;
use crate::types::{CipherSuite, ProtocolVersion, Random, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ServerHello {
                legacy_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.legacy_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cipher_suite.serialize(output);
        output.push(self.compression_method);
        serialize_extensions(&self.extensions, true, output)
    }

    pub fn is_hello_retry_request(&self) -> bool {
        self.random.is_hello_retry_request()
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        find_extension(&self.extensions, extension_type)
    }

    pub fn get<T: ExtensionData>(&self) -> Result<Option<T>, CodecError> {
        self.extension(T::TYPE).map(T::from_extension).transpose()
    }
}
