//! ClientKeyExchange (RFC 5246 Section 7.4.7, RFC 8422 Section 5.7)
//!
//! The body depends on the negotiated key exchange:
//!
//! ```text
//! RSA:    EncryptedPreMasterSecret, vec16 (SSL 3.0: no length prefix)
//! DHE:    opaque dh_Yc<1..2^16-1>
//! ECDHE:  opaque point <1..2^8-1>
//! ```

use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::types::{KeyExchangeAlgorithm, ProtocolVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    Rsa { encrypted_pre_master_secret: Buf },
    Dh { public: Buf },
    Ecdh { public: Buf },
}

impl ClientKeyExchange {
    pub fn parse(
        input: &[u8],
        kx: KeyExchangeAlgorithm,
        version: ProtocolVersion,
    ) -> IResult<&[u8], ClientKeyExchange> {
        match kx {
            KeyExchangeAlgorithm::Rsa => {
                let (rest, encrypted) = if version == ProtocolVersion::SSL3_0 {
                    (&input[input.len()..], input)
                } else {
                    codec::vec16(input)?
                };
                if encrypted.is_empty() {
                    return Err(codec::malformed(input));
                }
                Ok((
                    rest,
                    ClientKeyExchange::Rsa {
                        encrypted_pre_master_secret: Buf::from_slice(encrypted),
                    },
                ))
            }
            KeyExchangeAlgorithm::DheRsa => {
                let (rest, public) = codec::vec16(input)?;
                if public.is_empty() {
                    return Err(codec::malformed(input));
                }
                Ok((
                    rest,
                    ClientKeyExchange::Dh {
                        public: Buf::from_slice(public),
                    },
                ))
            }
            KeyExchangeAlgorithm::EcdheEcdsa | KeyExchangeAlgorithm::EcdheRsa => {
                let (rest, public) = codec::vec8(input)?;
                if public.is_empty() {
                    return Err(codec::malformed(input));
                }
                Ok((
                    rest,
                    ClientKeyExchange::Ecdh {
                        public: Buf::from_slice(public),
                    },
                ))
            }
            KeyExchangeAlgorithm::Tls13 => Err(codec::malformed(input)),
        }
    }

    pub fn serialize(&self, version: ProtocolVersion, output: &mut Buf) -> Result<(), CodecError> {
        match self {
            ClientKeyExchange::Rsa {
                encrypted_pre_master_secret,
            } => {
                if version == ProtocolVersion::SSL3_0 {
                    output.extend_from_slice(encrypted_pre_master_secret);
                    Ok(())
                } else {
                    codec::put_vec16(output, encrypted_pre_master_secret)
                }
            }
            ClientKeyExchange::Dh { public } => codec::put_vec16(output, public),
            ClientKeyExchange::Ecdh { public } => codec::put_vec8(output, public),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_length_prefix_depends_on_version() {
        let cke = ClientKeyExchange::Rsa {
            encrypted_pre_master_secret: Buf::from_slice(&[0xab; 128]),
        };

        let mut tls = Buf::new();
        cke.serialize(ProtocolVersion::TLS1_2, &mut tls).unwrap();
        assert_eq!(tls.len(), 130);
        assert_eq!(&tls[..2], &[0x00, 0x80]);

        let mut ssl3 = Buf::new();
        cke.serialize(ProtocolVersion::SSL3_0, &mut ssl3).unwrap();
        assert_eq!(ssl3.len(), 128);

        let (_, parsed) =
            ClientKeyExchange::parse(&tls, KeyExchangeAlgorithm::Rsa, ProtocolVersion::TLS1_2)
                .unwrap();
        assert_eq!(parsed, cke);
        let (rest, parsed) =
            ClientKeyExchange::parse(&ssl3, KeyExchangeAlgorithm::Rsa, ProtocolVersion::SSL3_0)
                .unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }

    #[test]
    fn ecdh_point() {
        let cke = ClientKeyExchange::Ecdh {
            public: Buf::from_slice(&[0x04; 65]),
        };
        let mut serialized = Buf::new();
        cke.serialize(ProtocolVersion::TLS1_2, &mut serialized).unwrap();
        assert_eq!(serialized[0], 65);
        let (rest, parsed) = ClientKeyExchange::parse(
            &serialized,
            KeyExchangeAlgorithm::EcdheEcdsa,
            ProtocolVersion::TLS1_2,
        )
        .unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }

    #[test]
    fn empty_public_rejected() {
        assert!(ClientKeyExchange::parse(
            &[0x00, 0x00],
            KeyExchangeAlgorithm::DheRsa,
            ProtocolVersion::TLS1_2
        )
        .is_err());
    }
}
