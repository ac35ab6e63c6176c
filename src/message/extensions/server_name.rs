//! Server Name Indication (RFC 6066 Section 3)

use nom::number::complete::be_u8;
use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::message::ExtensionType;

const HOST_NAME: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNameExtension {
    pub host_name: String,
}

impl ServerNameExtension {
    pub fn new(host_name: impl Into<String>) -> Self {
        ServerNameExtension {
            host_name: host_name.into(),
        }
    }
}

impl ExtensionData for ServerNameExtension {
    const TYPE: ExtensionType = ExtensionType::ServerName;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut list) = codec::vec16(input)?;
        let mut host_name = None;
        while !list.is_empty() {
            let (tail, name_type) = be_u8(list)?;
            let (tail, name) = codec::vec16(tail)?;
            if name_type == HOST_NAME {
                // At most one host_name entry.
                if host_name.is_some() {
                    return Err(codec::malformed(list));
                }
                let name = std::str::from_utf8(name).map_err(|_| codec::malformed(list))?;
                if name.is_empty() {
                    return Err(codec::malformed(list));
                }
                host_name = Some(name.to_string());
            }
            list = tail;
        }
        let host_name = host_name.ok_or_else(|| codec::malformed(input))?;
        Ok((rest, ServerNameExtension { host_name }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U16);
        output.push(HOST_NAME);
        codec::put_vec16(output, self.host_name.as_bytes())?;
        codec::finish_vec(output, mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x0C, // Server name list length
        0x00, // host_name
        0x00, 0x09, // Name length
        b'l', b'o', b'c', b'a', b'l', b'h', b'o', b's', b't',
    ];

    #[test]
    fn roundtrip() {
        let ext = ServerNameExtension::new("localhost");

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);

        let (rest, parsed) = ServerNameExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }
}
