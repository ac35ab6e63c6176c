//! ServerKeyExchange (RFC 5246 Section 7.4.3, RFC 8422 Section 5.4)
//!
//! ```text
//! DHE:    opaque dh_p<1..2^16-1>; opaque dh_g<1..2^16-1>; opaque dh_Ys<1..2^16-1>;
//! ECDHE:  ECCurveType curve_type = named_curve(3); NamedCurve namedcurve;
//!         opaque point <1..2^8-1>;
//! both followed by digitally-signed(client_random + server_random + params)
//! ```

use nom::number::complete::be_u8;
use nom::IResult;

use super::DigitallySigned;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::types::{KeyExchangeAlgorithm, NamedGroup};

const NAMED_CURVE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyParams {
    Dh { p: Buf, g: Buf, public: Buf },
    Ecdh { group: NamedGroup, public: Buf },
}

impl ServerKeyParams {
    pub fn parse(input: &[u8], kx: KeyExchangeAlgorithm) -> IResult<&[u8], ServerKeyParams> {
        match kx {
            KeyExchangeAlgorithm::DheRsa => {
                let (input, p) = codec::vec16(input)?;
                let (input, g) = codec::vec16(input)?;
                let (input, public) = codec::vec16(input)?;
                if p.is_empty() || g.is_empty() || public.is_empty() {
                    return Err(codec::malformed(input));
                }
                Ok((
                    input,
                    ServerKeyParams::Dh {
                        p: Buf::from_slice(p),
                        g: Buf::from_slice(g),
                        public: Buf::from_slice(public),
                    },
                ))
            }
            KeyExchangeAlgorithm::EcdheEcdsa | KeyExchangeAlgorithm::EcdheRsa => {
                let (input, curve_type) = be_u8(input)?;
                if curve_type != NAMED_CURVE {
                    return Err(codec::malformed(input));
                }
                let (input, group) = NamedGroup::parse(input)?;
                let (input, public) = codec::vec8(input)?;
                if public.is_empty() {
                    return Err(codec::malformed(input));
                }
                Ok((
                    input,
                    ServerKeyParams::Ecdh {
                        group,
                        public: Buf::from_slice(public),
                    },
                ))
            }
            KeyExchangeAlgorithm::Rsa | KeyExchangeAlgorithm::Tls13 => Err(codec::malformed(input)),
        }
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        match self {
            ServerKeyParams::Dh { p, g, public } => {
                codec::put_vec16(output, p)?;
                codec::put_vec16(output, g)?;
                codec::put_vec16(output, public)
            }
            ServerKeyParams::Ecdh { group, public } => {
                output.push(NAMED_CURVE);
                group.serialize(output);
                codec::put_vec8(output, public)
            }
        }
    }

    pub fn public(&self) -> &[u8] {
        match self {
            ServerKeyParams::Dh { public, .. } | ServerKeyParams::Ecdh { public, .. } => public,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: ServerKeyParams,
    pub signed: DigitallySigned,
}

impl ServerKeyExchange {
    pub fn parse(
        input: &[u8],
        kx: KeyExchangeAlgorithm,
        with_scheme: bool,
    ) -> IResult<&[u8], ServerKeyExchange> {
        let (input, params) = ServerKeyParams::parse(input, kx)?;
        let (input, signed) = DigitallySigned::parse(input, with_scheme)?;
        Ok((input, ServerKeyExchange { params, signed }))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.params.serialize(output)?;
        self.signed.serialize(output)
    }
}

/// The bytes a ServerKeyExchange signature covers.
pub fn signed_params(
    client_random: &[u8],
    server_random: &[u8],
    params: &ServerKeyParams,
) -> Result<Buf, CodecError> {
    let mut out = Buf::new();
    out.extend_from_slice(client_random);
    out.extend_from_slice(server_random);
    params.serialize(&mut out)?;
    Ok(out)
}
