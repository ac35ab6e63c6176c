use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::message::ExtensionType;
use crate::types::SignatureScheme;

/// Signature Algorithms extension (RFC 8446 Section 4.2.3)
///
/// Also used as the body of a TLS 1.2 CertificateRequest's
/// supported_signature_algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureAlgorithmsExtension {
    pub schemes: Vec<SignatureScheme>,
}

impl SignatureAlgorithmsExtension {
    pub fn new(schemes: &[SignatureScheme]) -> Self {
        SignatureAlgorithmsExtension {
            schemes: schemes.to_vec(),
        }
    }
}

pub(crate) fn parse_schemes(input: &[u8]) -> IResult<&[u8], Vec<SignatureScheme>> {
    let (rest, mut list) = codec::vec16(input)?;
    if list.is_empty() || list.len() % 2 != 0 {
        return Err(codec::malformed(input));
    }
    let mut schemes = Vec::with_capacity(list.len() / 2);
    while !list.is_empty() {
        let (tail, scheme) = SignatureScheme::parse(list)?;
        schemes.push(scheme);
        list = tail;
    }
    Ok((rest, schemes))
}

pub(crate) fn serialize_schemes(
    schemes: &[SignatureScheme],
    output: &mut Buf,
) -> Result<(), CodecError> {
    let mark = codec::start_vec(output, LengthWidth::U16);
    for scheme in schemes {
        scheme.serialize(output);
    }
    codec::finish_vec(output, mark)
}

impl ExtensionData for SignatureAlgorithmsExtension {
    const TYPE: ExtensionType = ExtensionType::SignatureAlgorithms;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, schemes) = parse_schemes(input)?;
        Ok((rest, SignatureAlgorithmsExtension { schemes }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        serialize_schemes(&self.schemes, output)
    }
}
