//! Key Share extension (RFC 8446 Section 4.2.8)
//!
//! The same extension type carries three different payloads:
//!
//! ```text
//! ClientHello:        KeyShareEntry client_shares<0..2^16-1>;
//! ServerHello:        KeyShareEntry server_share;
//! HelloRetryRequest:  NamedGroup selected_group;
//! ```

use nom::number::complete::be_u16;
use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::message::ExtensionType;
use crate::types::NamedGroup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub key_exchange: Buf,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, key_exchange: &[u8]) -> Self {
        KeyShareEntry {
            group,
            key_exchange: Buf::from_slice(key_exchange),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], KeyShareEntry> {
        let (input, group) = NamedGroup::parse(input)?;
        let (input, key_exchange) = codec::vec16(input)?;
        if key_exchange.is_empty() {
            return Err(codec::malformed(input));
        }
        Ok((input, KeyShareEntry::new(group, key_exchange)))
    }

    pub fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.group.serialize(output);
        codec::put_vec16(output, &self.key_exchange)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyShareClientHello {
    pub entries: Vec<KeyShareEntry>,
}

impl KeyShareClientHello {
    pub fn find(&self, group: NamedGroup) -> Option<&KeyShareEntry> {
        self.entries.iter().find(|e| e.group == group)
    }
}

impl ExtensionData for KeyShareClientHello {
    const TYPE: ExtensionType = ExtensionType::KeyShare;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut list) = codec::vec16(input)?;
        let mut entries: Vec<KeyShareEntry> = Vec::new();
        while !list.is_empty() {
            let (tail, entry) = KeyShareEntry::parse(list)?;
            // One share per group.
            if entries.iter().any(|e| e.group == entry.group) {
                return Err(codec::malformed(list));
            }
            entries.push(entry);
            list = tail;
        }
        Ok((rest, KeyShareClientHello { entries }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, codec::LengthWidth::U16);
        for entry in &self.entries {
            entry.serialize(output)?;
        }
        codec::finish_vec(output, mark)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareServerHello {
    pub entry: KeyShareEntry,
}

impl ExtensionData for KeyShareServerHello {
    const TYPE: ExtensionType = ExtensionType::KeyShare;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, entry) = KeyShareEntry::parse(input)?;
        Ok((rest, KeyShareServerHello { entry }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.entry.serialize(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyShareHelloRetryRequest {
    pub selected_group: NamedGroup,
}

impl ExtensionData for KeyShareHelloRetryRequest {
    const TYPE: ExtensionType = ExtensionType::KeyShare;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, value) = be_u16(input)?;
        Ok((
            rest,
            KeyShareHelloRetryRequest {
                selected_group: NamedGroup::from_u16(value),
            },
        ))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        self.selected_group.serialize(output);
        Ok(())
    }
}
