use nom::IResult;

use super::extension::{find_extension, parse_extensions, serialize_extensions};
use super::{Extension, ExtensionType};
use crate::buffer::Buf;
use crate::codec::{self, CodecError};

/// EncryptedExtensions (RFC 8446 Section 4.3.1)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptedExtensions {
    pub extensions: Vec<Extension>,
}

impl EncryptedExtensions {
    pub fn parse(input: &[u8]) -> IResult<&[u8], EncryptedExtensions> {
        // The extensions block is mandatory here.
        if input.len() < 2 {
            return Err(codec::malformed(input));
        }
        let (input, extensions) = parse_extensions(input)?;
        Ok((input, EncryptedExtensions { extensions }))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        serialize_extensions(&self.extensions, false, output)
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        find_extension(&self.extensions, extension_type)
    }
}
