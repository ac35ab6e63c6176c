//! CertificateRequest (RFC 5246 Section 7.4.4, RFC 8446 Section 4.3.2)

use nom::IResult;

use super::extension::{find_extension, parse_extensions, serialize_extensions};
use super::extensions::signature_algorithms::{parse_schemes, serialize_schemes};
use super::extensions::ExtensionData;
use super::{Extension, ExtensionType};
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::types::SignatureScheme;

/// ClientCertificateType values.
pub const RSA_SIGN: u8 = 1;
pub const ECDSA_SIGN: u8 = 64;

/// The SSL 3.0 through TLS 1.2 form.
///
/// `schemes` is only on the wire from TLS 1.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub schemes: Vec<SignatureScheme>,
    pub authorities: Vec<Buf>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8], with_schemes: bool) -> IResult<&[u8], CertificateRequest> {
        let (input, types) = codec::vec8(input)?;
        if types.is_empty() {
            return Err(codec::malformed(input));
        }
        let (input, schemes) = if with_schemes {
            parse_schemes(input)?
        } else {
            (input, Vec::new())
        };

        let (rest, mut list) = codec::vec16(input)?;
        let mut authorities = Vec::new();
        while !list.is_empty() {
            let (tail, dn) = codec::vec16(list)?;
            authorities.push(Buf::from_slice(dn));
            list = tail;
        }

        Ok((
            rest,
            CertificateRequest {
                certificate_types: types.to_vec(),
                schemes,
                authorities,
            },
        ))
    }

    pub fn serialize(&self, with_schemes: bool, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_vec8(output, &self.certificate_types)?;
        if with_schemes {
            serialize_schemes(&self.schemes, output)?;
        }
        let mark = codec::start_vec(output, LengthWidth::U16);
        for dn in &self.authorities {
            codec::put_vec16(output, dn)?;
        }
        codec::finish_vec(output, mark)
    }
}

/// The TLS 1.3 form. signature_algorithms is a mandatory extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest13 {
    pub context: Buf,
    pub extensions: Vec<Extension>,
}

impl CertificateRequest13 {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest13> {
        let (input, context) = codec::vec8(input)?;
        if input.len() < 2 {
            return Err(codec::malformed(input));
        }
        let (input, extensions) = parse_extensions(input)?;
        Ok((
            input,
            CertificateRequest13 {
                context: Buf::from_slice(context),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_vec8(output, &self.context)?;
        serialize_extensions(&self.extensions, false, output)
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        find_extension(&self.extensions, extension_type)
    }

    pub fn get<T: ExtensionData>(&self) -> Result<Option<T>, CodecError> {
        self.extension(T::TYPE).map(T::from_extension).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::extensions::SignatureAlgorithmsExtension;

    const MESSAGE: &[u8] = &[
        0x02, // Types length
        0x01, 0x40, // rsa_sign, ecdsa_sign
        0x00, 0x04, // Schemes length
        0x04, 0x03, 0x04, 0x01, // Schemes
        0x00, 0x00, // No authorities
    ];

    #[test]
    fn roundtrip_tls12() {
        let (rest, req) = CertificateRequest::parse(MESSAGE, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(req.certificate_types, vec![RSA_SIGN, ECDSA_SIGN]);
        assert_eq!(req.schemes.len(), 2);

        let mut serialized = Buf::new();
        req.serialize(true, &mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);
    }

    #[test]
    fn legacy_form_has_no_schemes() {
        let req = CertificateRequest {
            certificate_types: vec![RSA_SIGN],
            schemes: Vec::new(),
            authorities: vec![Buf::from_slice(b"dn")],
        };
        let mut serialized = Buf::new();
        req.serialize(false, &mut serialized).unwrap();
        assert_eq!(&serialized[..], &[0x01, 0x01, 0x00, 0x04, 0x00, 0x02, b'd', b'n']);
        let (_, parsed) = CertificateRequest::parse(&serialized, false).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn roundtrip_tls13() {
        let req = CertificateRequest13 {
            context: Buf::new(),
            extensions: vec![SignatureAlgorithmsExtension::new(&[
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            ])
            .to_extension()
            .unwrap()],
        };
        let mut serialized = Buf::new();
        req.serialize(&mut serialized).unwrap();
        let (rest, parsed) = CertificateRequest13::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, req);
        assert!(parsed.get::<SignatureAlgorithmsExtension>().unwrap().is_some());
    }
}
