//! NewSessionTicket (RFC 8446 Section 4.6.1)
//!
//! ```text
//! struct {
//!     uint32 ticket_lifetime;
//!     uint32 ticket_age_add;
//!     opaque ticket_nonce<0..255>;
//!     opaque ticket<1..2^16-1>;
//!     Extension extensions<0..2^16-2>;
//! } NewSessionTicket;
//! ```

use nom::number::complete::be_u32;
use nom::IResult;

use super::extension::{parse_extensions, serialize_extensions};
use super::Extension;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};

/// Longest lifetime a ticket may carry: seven days.
pub const MAX_TICKET_LIFETIME: u32 = 604_800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Buf,
    pub ticket: Buf,
    pub extensions: Vec<Extension>,
}

impl NewSessionTicket {
    pub fn parse(input: &[u8]) -> IResult<&[u8], NewSessionTicket> {
        let (input, lifetime) = be_u32(input)?;
        let (input, age_add) = be_u32(input)?;
        let (input, nonce) = codec::vec8(input)?;
        let (input, ticket) = codec::vec16(input)?;
        if ticket.is_empty() || lifetime > MAX_TICKET_LIFETIME {
            return Err(codec::malformed(input));
        }
        if input.len() < 2 {
            return Err(codec::malformed(input));
        }
        let (input, extensions) = parse_extensions(input)?;
        Ok((
            input,
            NewSessionTicket {
                lifetime,
                age_add,
                nonce: Buf::from_slice(nonce),
                ticket: Buf::from_slice(ticket),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_u32(output, self.lifetime);
        codec::put_u32(output, self.age_add);
        codec::put_vec8(output, &self.nonce)?;
        codec::put_vec16(output, &self.ticket)?;
        serialize_extensions(&self.extensions, false, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x00, 0x1C, 0x20, // Lifetime 7200
        0x01, 0x02, 0x03, 0x04, // Age add
        0x01, 0x00, // Nonce
        0x00, 0x03, 0xAA, 0xBB, 0xCC, // Ticket
        0x00, 0x00, // Extensions
    ];

    #[test]
    fn roundtrip() {
        let (rest, ticket) = NewSessionTicket::parse(MESSAGE).unwrap();
        assert!(rest.is_empty());
        assert_eq!(ticket.lifetime, 7200);
        assert_eq!(&ticket.ticket[..], &[0xAA, 0xBB, 0xCC]);

        let mut serialized = Buf::new();
        ticket.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);
    }

    #[test]
    fn lifetime_over_seven_days_rejected() {
        let mut bad = MESSAGE.to_vec();
        bad[..4].copy_from_slice(&(MAX_TICKET_LIFETIME + 1).to_be_bytes());
        assert!(NewSessionTicket::parse(&bad).is_err());
    }
}
