//! Renegotiation Indication extension (RFC 5746 Section 3.2)
//!
//! Empty on an initial handshake. On a renegotiation the client sends its
//! previous Finished verify_data, the server both its and the client's.

use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::message::ExtensionType;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenegotiationInfoExtension {
    pub renegotiated_connection: Buf,
}

impl RenegotiationInfoExtension {
    pub fn new(renegotiated_connection: &[u8]) -> Self {
        RenegotiationInfoExtension {
            renegotiated_connection: Buf::from_slice(renegotiated_connection),
        }
    }
}

impl ExtensionData for RenegotiationInfoExtension {
    const TYPE: ExtensionType = ExtensionType::RenegotiationInfo;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, data) = codec::vec8(input)?;
        Ok((rest, RenegotiationInfoExtension::new(data)))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_vec8(output, &self.renegotiated_connection)
    }
}
