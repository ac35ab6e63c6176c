use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::types::ProtocolVersion;

/// HelloVerifyRequest (RFC 6347 Section 4.2.1)
///
/// Carries the stateless cookie the client must echo in its second
/// ClientHello. `server_version` is DTLS 1.0 regardless of what is
/// negotiated later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Buf,
}

impl HelloVerifyRequest {
    pub fn new(cookie: Buf) -> Self {
        HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_0,
            cookie,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = codec::vec8(input)?;
        if cookie.is_empty() {
            return Err(codec::malformed(input));
        }
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie: Buf::from_slice(cookie),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.server_version.serialize(output);
        codec::put_vec8(output, &self.cookie)
    }
}
