//! Pre-shared key extensions (RFC 8446 Sections 4.2.9 and 4.2.11)
//!
//! ```text
//! struct {
//!     opaque identity<1..2^16-1>;
//!     uint32 obfuscated_ticket_age;
//! } PskIdentity;
//!
//! struct {
//!     PskIdentity identities<7..2^16-1>;
//!     PskBinderEntry binders<33..2^16-1>;
//! } OfferedPsks;
//! ```
//!
//! The binders cover the ClientHello up to but excluding the binders list,
//! see [`OfferedPsks::binders_len`].

use nom::number::complete::{be_u16, be_u32};
use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::message::ExtensionType;
use crate::types::PskKeyExchangeMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskKeyExchangeModesExtension {
    pub modes: Vec<PskKeyExchangeMode>,
}

impl PskKeyExchangeModesExtension {
    pub fn contains(&self, mode: PskKeyExchangeMode) -> bool {
        self.modes.contains(&mode)
    }
}

impl ExtensionData for PskKeyExchangeModesExtension {
    const TYPE: ExtensionType = ExtensionType::PskKeyExchangeModes;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, modes) = codec::vec8(input)?;
        if modes.is_empty() {
            return Err(codec::malformed(input));
        }
        let modes = modes.iter().map(|m| PskKeyExchangeMode::from_u8(*m)).collect();
        Ok((rest, PskKeyExchangeModesExtension { modes }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U8);
        for mode in &self.modes {
            output.push(mode.as_u8());
        }
        codec::finish_vec(output, mark)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: Buf,
    pub obfuscated_ticket_age: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedPsks {
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<Buf>,
}

impl OfferedPsks {
    /// Encoded length of the binders list including its length prefix.
    pub fn binders_len(&self) -> usize {
        2 + self.binders.iter().map(|b| 1 + b.len()).sum::<usize>()
    }

    fn serialize_binders(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U16);
        for binder in &self.binders {
            codec::put_vec8(output, binder)?;
        }
        codec::finish_vec(output, mark)
    }
}

impl ExtensionData for OfferedPsks {
    const TYPE: ExtensionType = ExtensionType::PreSharedKey;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut list) = codec::vec16(input)?;
        let mut identities = Vec::new();
        while !list.is_empty() {
            let (tail, identity) = codec::vec16(list)?;
            let (tail, obfuscated_ticket_age) = be_u32(tail)?;
            if identity.is_empty() {
                return Err(codec::malformed(list));
            }
            identities.push(PskIdentity {
                identity: Buf::from_slice(identity),
                obfuscated_ticket_age,
            });
            list = tail;
        }

        let (rest, mut list) = codec::vec16(rest)?;
        let mut binders = Vec::new();
        while !list.is_empty() {
            let (tail, binder) = codec::vec8(list)?;
            if binder.len() < 32 {
                return Err(codec::malformed(list));
            }
            binders.push(Buf::from_slice(binder));
            list = tail;
        }

        if identities.is_empty() || identities.len() != binders.len() {
            return Err(codec::malformed(input));
        }
        Ok((rest, OfferedPsks { identities, binders }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U16);
        for id in &self.identities {
            codec::put_vec16(output, &id.identity)?;
            codec::put_u32(output, id.obfuscated_ticket_age);
        }
        codec::finish_vec(output, mark)?;
        self.serialize_binders(output)
    }
}

/// The server's choice among the offered identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedPsk(pub u16);

impl ExtensionData for SelectedPsk {
    const TYPE: ExtensionType = ExtensionType::PreSharedKey;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, index) = be_u16(input)?;
        Ok((rest, SelectedPsk(index)))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_u16(output, self.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_roundtrip() {
        let ext = PskKeyExchangeModesExtension {
            modes: vec![PskKeyExchangeMode::PskDheKe],
        };
        let raw = ext.to_extension().unwrap();
        assert_eq!(&raw.data[..], &[0x01, 0x01]);
        let parsed = PskKeyExchangeModesExtension::from_extension(&raw).unwrap();
        assert!(parsed.contains(PskKeyExchangeMode::PskDheKe));
        assert!(!parsed.contains(PskKeyExchangeMode::PskKe));
    }

    #[test]
    fn offered_psks_roundtrip() {
        let offered = OfferedPsks {
            identities: vec![PskIdentity {
                identity: Buf::from_slice(b"ticket"),
                obfuscated_ticket_age: 0x01020304,
            }],
            binders: vec![Buf::from_slice(&[0x55; 32])],
        };

        let mut serialized = Buf::new();
        offered.serialize(&mut serialized).unwrap();
        assert_eq!(offered.binders_len(), 2 + 1 + 32);
        assert_eq!(serialized.len(), 2 + 2 + 6 + 4 + offered.binders_len());

        let (rest, parsed) = OfferedPsks::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, offered);
    }

    #[test]
    fn binder_count_must_match() {
        let offered = OfferedPsks {
            identities: vec![PskIdentity {
                identity: Buf::from_slice(b"a"),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![],
        };
        let mut serialized = Buf::new();
        offered.serialize(&mut serialized).unwrap();
        assert!(OfferedPsks::parse(&serialized).is_err());
    }
}
