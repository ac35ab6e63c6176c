use nom::IResult;

use super::DigitallySigned;
use crate::buffer::Buf;
use crate::codec::CodecError;

/// Context string prefixed to a TLS 1.3 server CertificateVerify.
pub const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// Context string prefixed to a TLS 1.3 client CertificateVerify.
pub const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// CertificateVerify (RFC 5246 Section 7.4.8, RFC 8446 Section 4.4.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signed: DigitallySigned,
}

impl CertificateVerify {
    pub fn new(signed: DigitallySigned) -> Self {
        CertificateVerify { signed }
    }

    pub fn parse(input: &[u8], with_scheme: bool) -> IResult<&[u8], CertificateVerify> {
        let (input, signed) = DigitallySigned::parse(input, with_scheme)?;
        Ok((input, CertificateVerify { signed }))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.signed.serialize(output)
    }
}

/// The content a TLS 1.3 CertificateVerify signature covers: 64 spaces,
/// the context string, a zero byte, then the transcript hash.
pub fn tls13_signed_content(server: bool, transcript_hash: &[u8]) -> Buf {
    let context = if server { SERVER_CONTEXT } else { CLIENT_CONTEXT };
    let mut out = Buf::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.extend_from_slice(&[0x20; 64]);
    out.extend_from_slice(context);
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureScheme;

    #[test]
    fn roundtrip() {
        let cv = CertificateVerify::new(DigitallySigned::new(
            Some(SignatureScheme::RSA_PKCS1_SHA256),
            Buf::from_slice(&[0x11; 64]),
        ));
        let mut serialized = Buf::new();
        cv.serialize(&mut serialized).unwrap();
        assert_eq!(serialized.len(), 2 + 2 + 64);

        let (rest, parsed) = CertificateVerify::parse(&serialized, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cv);
    }

    #[test]
    fn signed_content_layout() {
        let content = tls13_signed_content(true, &[0xab; 32]);
        assert_eq!(content.len(), 64 + 33 + 1 + 32);
        assert!(content[..64].iter().all(|b| *b == 0x20));
        assert_eq!(&content[64..97], SERVER_CONTEXT);
        assert_eq!(content[97], 0);
    }
}
