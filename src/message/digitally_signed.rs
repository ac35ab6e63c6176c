use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::types::SignatureScheme;

/// A signature with the scheme that made it (RFC 5246 Section 4.7).
///
/// Before TLS 1.2 the scheme is implied by the key and not on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub scheme: Option<SignatureScheme>,
    pub signature: Buf,
}

impl DigitallySigned {
    pub fn new(scheme: Option<SignatureScheme>, signature: Buf) -> Self {
        DigitallySigned { scheme, signature }
    }

    pub fn parse(input: &[u8], with_scheme: bool) -> IResult<&[u8], DigitallySigned> {
        let (input, scheme) = if with_scheme {
            let (input, scheme) = SignatureScheme::parse(input)?;
            (input, Some(scheme))
        } else {
            (input, None)
        };
        let (input, signature) = codec::vec16(input)?;
        Ok((input, DigitallySigned::new(scheme, Buf::from_slice(signature))))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        if let Some(scheme) = self.scheme {
            scheme.serialize(output);
        }
        codec::put_vec16(output, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x04, 0x03, // ecdsa_secp256r1_sha256
        0x00, 0x04, // Signature length
        0x01, 0x02, 0x03, 0x04, // Signature
    ];

    #[test]
    fn roundtrip() {
        let signed = DigitallySigned::new(
            Some(SignatureScheme::ECDSA_SECP256R1_SHA256),
            Buf::from_slice(&[1, 2, 3, 4]),
        );

        let mut serialized = Buf::new();
        signed.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);

        let (rest, parsed) = DigitallySigned::parse(&serialized, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, signed);
    }

    #[test]
    fn legacy_form_has_no_scheme() {
        let (rest, parsed) = DigitallySigned::parse(&MESSAGE[2..], false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.scheme, None);
        assert_eq!(&parsed.signature[..], &[1, 2, 3, 4]);
    }
}
