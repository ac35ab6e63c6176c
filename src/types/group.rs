use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;

/// Named groups for (EC)DHE key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
    Secp521r1,
    X25519,
    X448,
    Ffdhe2048,
    Ffdhe3072,
    Unknown(u16),
}

/// Family of a named group, which decides the key exchange kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Ecdhe,
    Xdh,
    Ffdhe,
}

impl NamedGroup {
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedGroup::Secp256r1,
            24 => NamedGroup::Secp384r1,
            25 => NamedGroup::Secp521r1,
            29 => NamedGroup::X25519,
            30 => NamedGroup::X448,
            0x0100 => NamedGroup::Ffdhe2048,
            0x0101 => NamedGroup::Ffdhe3072,
            _ => NamedGroup::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Secp384r1 => 24,
            NamedGroup::Secp521r1 => 25,
            NamedGroup::X25519 => 29,
            NamedGroup::X448 => 30,
            NamedGroup::Ffdhe2048 => 0x0100,
            NamedGroup::Ffdhe3072 => 0x0101,
            NamedGroup::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedGroup> {
        let (input, v) = be_u16(input)?;
        Ok((input, Self::from_u16(v)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn kind(&self) -> Option<GroupKind> {
        match self {
            NamedGroup::Secp256r1 | NamedGroup::Secp384r1 | NamedGroup::Secp521r1 => {
                Some(GroupKind::Ecdhe)
            }
            NamedGroup::X25519 | NamedGroup::X448 => Some(GroupKind::Xdh),
            NamedGroup::Ffdhe2048 | NamedGroup::Ffdhe3072 => Some(GroupKind::Ffdhe),
            NamedGroup::Unknown(_) => None,
        }
    }

    /// Usable in a TLS 1.2 ECDHE_* suite (named curve key exchange).
    pub fn is_ec(&self) -> bool {
        matches!(self.kind(), Some(GroupKind::Ecdhe) | Some(GroupKind::Xdh))
    }
}
