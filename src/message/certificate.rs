//! Certificate (RFC 5246 Section 7.4.2, RFC 8446 Section 4.4.2)
//!
//! ```text
//! TLS 1.2:  ASN.1Cert certificate_list<0..2^24-1>;
//!
//! TLS 1.3:  opaque certificate_request_context<0..2^8-1>;
//!           CertificateEntry certificate_list<0..2^24-1>;
//!           where CertificateEntry = cert_data<1..2^24-1> + Extension extensions<0..2^16-1>
//! ```

use nom::IResult;

use super::extension::{parse_extensions, serialize_extensions};
use super::Extension;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert_data: Buf,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// `Some` for TLS 1.3.
    pub context: Option<Buf>,
    pub entries: Vec<CertificateEntry>,
}

impl Certificate {
    pub fn new(chain: &[Vec<u8>], context: Option<Buf>) -> Self {
        let entries = chain
            .iter()
            .map(|c| CertificateEntry {
                cert_data: Buf::from_slice(c),
                extensions: Vec::new(),
            })
            .collect();
        Certificate { context, entries }
    }

    /// The chain as DER certificates, leaf first.
    pub fn chain(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.cert_data.to_vec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(input: &[u8], tls13: bool) -> IResult<&[u8], Certificate> {
        let (input, context) = if tls13 {
            let (input, context) = codec::vec8(input)?;
            (input, Some(Buf::from_slice(context)))
        } else {
            (input, None)
        };

        let (rest, mut list) = codec::vec24(input)?;
        let mut entries = Vec::new();
        while !list.is_empty() {
            let (tail, cert_data) = codec::vec24(list)?;
            if cert_data.is_empty() {
                return Err(codec::malformed(list));
            }
            let (tail, extensions) = if tls13 {
                // Entry extensions are always present, possibly empty.
                if tail.len() < 2 {
                    return Err(codec::malformed(tail));
                }
                parse_extensions(tail)?
            } else {
                (tail, Vec::new())
            };
            entries.push(CertificateEntry {
                cert_data: Buf::from_slice(cert_data),
                extensions,
            });
            list = tail;
        }

        Ok((rest, Certificate { context, entries }))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        if let Some(context) = &self.context {
            codec::put_vec8(output, context)?;
        }
        let mark = codec::start_vec(output, LengthWidth::U24);
        for entry in &self.entries {
            codec::put_vec24(output, &entry.cert_data)?;
            if self.context.is_some() {
                serialize_extensions(&entry.extensions, false, output)?;
            }
        }
        codec::finish_vec(output, mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x00, 0x0A, // Certificate list length
        0x00, 0x00, 0x03, 0x01, 0x02, 0x03, // Certificate 1
        0x00, 0x00, 0x01, 0x04, // Certificate 2
    ];

    #[test]
    fn roundtrip_tls12() {
        let cert = Certificate::new(&[vec![1, 2, 3], vec![4]], None);

        let mut serialized = Buf::new();
        cert.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);

        let (rest, parsed) = Certificate::parse(&serialized, false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cert);
        assert_eq!(parsed.chain(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn roundtrip_tls13() {
        let cert = Certificate::new(&[vec![9; 300]], Some(Buf::from_slice(&[0xaa])));
        let mut serialized = Buf::new();
        cert.serialize(&mut serialized).unwrap();
        // context(2) + list length(3) + cert length(3) + cert + extensions(2)
        assert_eq!(serialized.len(), 2 + 3 + 3 + 300 + 2);

        let (rest, parsed) = Certificate::parse(&serialized, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cert);
    }

    #[test]
    fn empty_chain() {
        let (_, parsed) = Certificate::parse(&[0, 0, 0], false).unwrap();
        assert!(parsed.is_empty());
    }
}
