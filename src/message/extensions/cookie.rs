//! Cookie extension (RFC 8446 Section 4.2.2)
//!
//! Sent by the server in a HelloRetryRequest and echoed by the client in the
//! second ClientHello. The cookie is opaque to the client.
//!
//! The grammar allows `cookie<1..2^16-1>`; an empty cookie is rejected at parse
//! time.

use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::message::ExtensionType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieExtension {
    pub cookie: Buf,
}

impl ExtensionData for CookieExtension {
    const TYPE: ExtensionType = ExtensionType::Cookie;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, cookie) = codec::vec16(input)?;
        if cookie.is_empty() {
            return Err(codec::malformed(input));
        }
        Ok((
            rest,
            CookieExtension {
                cookie: Buf::from_slice(cookie),
            },
        ))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_vec16(output, &self.cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_roundtrip() {
        let cookie_data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let ext = CookieExtension {
            cookie: Buf::from_slice(&cookie_data),
        };

        let mut output = Buf::new();
        ext.serialize(&mut output).unwrap();

        // 2 bytes length + 8 bytes cookie
        assert_eq!(output.len(), 10);
        assert_eq!(&output[0..2], &[0x00, 0x08]);

        let (rest, parsed) = CookieExtension::parse(&output).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn test_empty_cookie_rejected() {
        assert!(CookieExtension::parse(&[0x00, 0x00]).is_err());
        assert!(CookieExtension::parse(&[0x00]).is_err());

        let (_, parsed) = CookieExtension::parse(&[0x00, 0x01, 0x7f]).unwrap();
        assert_eq!(&parsed.cookie[..], &[0x7f]);
    }
}
