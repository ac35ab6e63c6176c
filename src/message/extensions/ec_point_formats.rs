use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::message::ExtensionType;

/// The only point format the engine uses.
pub const UNCOMPRESSED: u8 = 0;

/// EC Point Formats extension (RFC 8422 Section 5.1.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPointFormatsExtension {
    pub formats: Vec<u8>,
}

impl Default for EcPointFormatsExtension {
    fn default() -> Self {
        EcPointFormatsExtension {
            formats: vec![UNCOMPRESSED],
        }
    }
}

impl EcPointFormatsExtension {
    pub fn supports_uncompressed(&self) -> bool {
        self.formats.contains(&UNCOMPRESSED)
    }
}

impl ExtensionData for EcPointFormatsExtension {
    const TYPE: ExtensionType = ExtensionType::EcPointFormats;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, formats) = codec::vec8(input)?;
        if formats.is_empty() {
            return Err(codec::malformed(input));
        }
        Ok((
            rest,
            EcPointFormatsExtension {
                formats: formats.to_vec(),
            },
        ))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_vec8(output, &self.formats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x01, // Formats length
        0x00, // uncompressed
    ];

    #[test]
    fn roundtrip() {
        let ext = EcPointFormatsExtension::default();

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);

        let (rest, parsed) = EcPointFormatsExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert!(parsed.supports_uncompressed());
    }
}
