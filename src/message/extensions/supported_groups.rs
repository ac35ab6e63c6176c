use nom::IResult;

use super::ExtensionData;
use crate::buffer::Buf;
use crate::codec::{self, CodecError, LengthWidth};
use crate::message::ExtensionType;
use crate::types::NamedGroup;

/// Supported Groups extension (RFC 8422 Section 5.1.1, RFC 7919)
///
/// Unknown groups are kept so that preference order is preserved; selection
/// skips them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedGroupsExtension {
    pub groups: Vec<NamedGroup>,
}

impl SupportedGroupsExtension {
    pub fn new(groups: &[NamedGroup]) -> Self {
        SupportedGroupsExtension {
            groups: groups.to_vec(),
        }
    }
}

impl ExtensionData for SupportedGroupsExtension {
    const TYPE: ExtensionType = ExtensionType::SupportedGroups;

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut list) = codec::vec16(input)?;
        if list.is_empty() || list.len() % 2 != 0 {
            return Err(codec::malformed(input));
        }
        let mut groups = Vec::with_capacity(list.len() / 2);
        while !list.is_empty() {
            let (tail, group) = NamedGroup::parse(list)?;
            groups.push(group);
            list = tail;
        }
        Ok((rest, SupportedGroupsExtension { groups }))
    }

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError> {
        let mark = codec::start_vec(output, LengthWidth::U16);
        for group in &self.groups {
            group.serialize(output);
        }
        codec::finish_vec(output, mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x08, // Groups length
        0x00, 0x1D, // x25519
        0x00, 0x17, // secp256r1
        0x00, 0x18, // secp384r1
        0x01, 0x00, // ffdhe2048
    ];

    #[test]
    fn roundtrip() {
        let ext = SupportedGroupsExtension::new(&[
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
            NamedGroup::Ffdhe2048,
        ]);

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized).unwrap();
        assert_eq!(&serialized[..], MESSAGE);

        let (rest, parsed) = SupportedGroupsExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }
}
