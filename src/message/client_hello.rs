//! ClientHello (RFC 8446 Section 4.1.2, RFC 6347 Section 4.2.1)
//!
//! ```text
//! struct {
//!     ProtocolVersion legacy_version;
//!     Random random;
//!     opaque legacy_session_id<0..32>;
//!     opaque cookie<0..2^8-1>;                  // DTLS only
//!     CipherSuite cipher_suites<2..2^16-2>;
//!     opaque legacy_compression_methods<1..2^8-1>;
//!     Extension extensions<8..2^16-1>;          // may be absent before TLS 1.2
//! } ClientHello;
//! ```

use nom::IResult;

use super::extension::{find_extension, parse_extensions, serialize_extensions};
use super::extensions::{ExtensionData, OfferedPsks};
use super::{Extension, ExtensionType};
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::types::{CipherSuite, ProtocolVersion, Random, SessionId};

/// The null compression method, the only one ever used.
pub const COMPRESSION_NULL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    /// Present iff the hello is a DTLS hello.
    pub cookie: Option<Buf>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], ClientHello> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;

        let (input, cookie) = if dtls {
            let (input, cookie) = codec::vec8(input)?;
            (input, Some(Buf::from_slice(cookie)))
        } else {
            (input, None)
        };

        let (input, suites) = codec::vec16(input)?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(codec::malformed(suites));
        }
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| CipherSuite::from_u16(u16::from_be_bytes([c[0], c[1]])))
            .collect();

        let (input, compression) = codec::vec8(input)?;
        if compression.is_empty() {
            return Err(codec::malformed(compression));
        }

        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ClientHello {
                legacy_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods: compression.to_vec(),
                extensions,
            },
        ))
    }

    fn serialize_fields(&self, with_cookie: bool, output: &mut Buf) -> Result<(), CodecError> {
        self.legacy_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        if with_cookie {
            if let Some(cookie) = &self.cookie {
                codec::put_vec8(output, cookie)?;
            }
        }

        let mark = codec::start_vec(output, LengthWidth::U16);
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }
        codec::finish_vec(output, mark)?;

        codec::put_vec8(output, &self.compression_methods)
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.serialize_fields(true, output)?;
        serialize_extensions(&self.extensions, true, output)
    }

    /// The fields a DTLS cookie is bound to: everything before the
    /// extensions except the cookie itself.
    pub fn cookie_input(&self) -> Result<Buf, CodecError> {
        let mut out = Buf::new();
        self.serialize_fields(false, &mut out)?;
        Ok(out)
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        find_extension(&self.extensions, extension_type)
    }

    /// Parse one extension payload, `None` if absent.
    pub fn get<T: ExtensionData>(&self) -> Result<Option<T>, CodecError> {
        self.extension(T::TYPE).map(T::from_extension).transpose()
    }

    pub fn offers_suite(&self, suite: CipherSuite) -> bool {
        self.cipher_suites.contains(&suite)
    }
}

/// The part of an encoded ClientHello that PSK binders are computed over.
///
/// `encoded` is the complete handshake message, header included. The
/// pre_shared_key extension is last, so its binders list is the tail.
pub fn binder_prefix<'a>(encoded: &'a [u8], offered: &OfferedPsks) -> Option<&'a [u8]> {
    encoded.len().checked_sub(offered.binders_len()).map(|n| &encoded[..n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::extensions::{PskIdentity, SupportedVersionsClientHello};

    fn hello(dtls: bool) -> ClientHello {
        ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: Random { bytes: [0x42; 32] },
            session_id: SessionId::try_new(&[1, 2, 3]).unwrap(),
            cookie: dtls.then(Buf::new),
            cipher_suites: vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            ],
            compression_methods: vec![COMPRESSION_NULL],
            extensions: vec![SupportedVersionsClientHello {
                versions: vec![ProtocolVersion::TLS1_3],
            }
            .to_extension()
            .unwrap()],
        }
    }

    #[test]
    fn roundtrip_tls() {
        let ch = hello(false);
        let mut serialized = Buf::new();
        ch.serialize(&mut serialized).unwrap();

        let (rest, parsed) = ClientHello::parse(&serialized, false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ch);

        let versions = parsed.get::<SupportedVersionsClientHello>().unwrap().unwrap();
        assert_eq!(versions.versions, vec![ProtocolVersion::TLS1_3]);
    }

    #[test]
    fn roundtrip_dtls_with_cookie() {
        let mut ch = hello(true);
        ch.legacy_version = ProtocolVersion::DTLS1_2;
        ch.cookie = Some(Buf::from_slice(&[7; 32]));

        let mut serialized = Buf::new();
        ch.serialize(&mut serialized).unwrap();
        let (_, parsed) = ClientHello::parse(&serialized, true).unwrap();
        assert_eq!(parsed, ch);

        // The cookie input does not depend on the cookie.
        let mut without = ch.clone();
        without.cookie = Some(Buf::new());
        assert_eq!(ch.cookie_input().unwrap(), without.cookie_input().unwrap());
    }

    #[test]
    fn legacy_hello_without_extensions() {
        let mut ch = hello(false);
        ch.extensions.clear();
        let mut serialized = Buf::new();
        ch.serialize(&mut serialized).unwrap();
        let (rest, parsed) = ClientHello::parse(&serialized, false).unwrap();
        assert!(rest.is_empty());
        assert!(parsed.extensions.is_empty());
    }

    #[test]
    fn empty_suites_rejected() {
        let mut ch = hello(false);
        ch.cipher_suites.clear();
        let mut serialized = Buf::new();
        ch.serialize(&mut serialized).unwrap();
        assert!(ClientHello::parse(&serialized, false).is_err());
    }

    #[test]
    fn binder_prefix_strips_binders() {
        let offered = OfferedPsks {
            identities: vec![PskIdentity {
                identity: Buf::from_slice(b"id"),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![Buf::from_slice(&[0; 32])],
        };
        let encoded = [0u8; 100];
        assert_eq!(binder_prefix(&encoded, &offered).unwrap().len(), 100 - 35);
        assert!(binder_prefix(&encoded[..10], &offered).is_none());
    }
}
