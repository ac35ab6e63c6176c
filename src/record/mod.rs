//! Record envelope.
//!
//! ```text
//! TLS:   type(1) version(2) length(2) fragment
//! DTLS:  type(1) version(2) epoch(2) sequence_number(6) length(2) fragment
//! ```
//!
//! Only the header codec lives here. Protection is done by
//! [`RecordCipher`](crate::crypto::cipher::RecordCipher).

mod window;

pub use window::ReplayWindow;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::crypto::cipher::MAX_FRAGMENT_LEN;
use crate::types::{ContentType, ProtocolVersion};

pub const TLS_HEADER_LEN: usize = 5;
pub const DTLS_HEADER_LEN: usize = 13;

/// Largest protected fragment accepted: 2^14 plus expansion.
pub const MAX_CIPHERTEXT_LEN: usize = MAX_FRAGMENT_LEN + 2048;

/// DTLS sequence numbers are 48 bits.
pub const DTLS_MAX_SEQ: u64 = 1 << 48;

pub fn header_len(dtls: bool) -> usize {
    if dtls {
        DTLS_HEADER_LEN
    } else {
        TLS_HEADER_LEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// DTLS only, zero for TLS.
    pub epoch: u16,
    /// DTLS only, zero for TLS.
    pub sequence_number: u64,
    pub fragment: Buf,
}

fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = take(6usize)(input)?;
    let mut v = [0u8; 8];
    v[2..].copy_from_slice(bytes);
    Ok((input, u64::from_be_bytes(v)))
}

impl Record {
    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], Record> {
        let (input, content_type) = be_u8(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch, sequence_number) = if dtls {
            let (input, epoch) = be_u16(input)?;
            let (input, seq) = be_u48(input)?;
            (input, epoch, seq)
        } else {
            (input, 0, 0)
        };
        let (input, length) = be_u16(input)?;
        if length as usize > MAX_CIPHERTEXT_LEN {
            return Err(codec::malformed(input));
        }
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            Record {
                content_type: ContentType::from_u8(content_type),
                version,
                epoch,
                sequence_number,
                fragment: Buf::from_slice(fragment),
            },
        ))
    }

    pub fn serialize(&self, dtls: bool, output: &mut Buf) -> Result<(), CodecError> {
        if self.fragment.len() > MAX_CIPHERTEXT_LEN {
            return Err(CodecError::FieldOverflow {
                len: self.fragment.len(),
                max: MAX_CIPHERTEXT_LEN,
            });
        }
        codec::put_u8(output, self.content_type.as_u8());
        self.version.serialize(output);
        if dtls {
            codec::put_u16(output, self.epoch);
            output.extend_from_slice(&self.sequence_number.to_be_bytes()[2..]);
        }
        codec::put_u16(output, self.fragment.len() as u16);
        output.extend_from_slice(&self.fragment);
        Ok(())
    }

    /// The 64-bit sequence value used in nonces and additional data:
    /// the record counter for TLS, epoch and 48-bit sequence number for DTLS.
    pub fn aead_seq(&self, dtls: bool, tls_seq: u64) -> u64 {
        if dtls {
            dtls_seq(self.epoch, self.sequence_number)
        } else {
            tls_seq
        }
    }
}

pub fn dtls_seq(epoch: u16, sequence_number: u64) -> u64 {
    ((epoch as u64) << 48) | (sequence_number & (DTLS_MAX_SEQ - 1))
}

/// Length of the first complete record in `input`, header included.
///
/// `None` while more bytes are needed.
pub fn complete_record_len(input: &[u8], dtls: bool) -> Option<usize> {
    let header = header_len(dtls);
    if input.len() < header {
        return None;
    }
    let length = u16::from_be_bytes([input[header - 2], input[header - 1]]) as usize;
    let total = header + length;
    (input.len() >= total).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DTLS_RECORD: &[u8] = &[
        0x16, // Handshake
        0xFE, 0xFD, // DTLS 1.2
        0x00, 0x01, // Epoch
        0x00, 0x00, 0x00, 0x00, 0x01, 0x02, // Sequence number
        0x00, 0x03, // Length
        0xAA, 0xBB, 0xCC, // Fragment
    ];

    #[test]
    fn dtls_roundtrip() {
        let (rest, record) = Record::parse(DTLS_RECORD, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(record.content_type, ContentType::Handshake);
        assert_eq!(record.epoch, 1);
        assert_eq!(record.sequence_number, 0x0102);
        assert_eq!(record.aead_seq(true, 99), (1 << 48) | 0x0102);

        let mut serialized = Buf::new();
        record.serialize(true, &mut serialized).unwrap();
        assert_eq!(&serialized[..], DTLS_RECORD);
    }

    #[test]
    fn tls_header_is_five_bytes() {
        let record = Record {
            content_type: ContentType::Alert,
            version: ProtocolVersion::TLS1_2,
            epoch: 0,
            sequence_number: 0,
            fragment: Buf::from_slice(&[2, 40]),
        };
        let mut serialized = Buf::new();
        record.serialize(false, &mut serialized).unwrap();
        assert_eq!(&serialized[..], &[0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28]);
        assert_eq!(complete_record_len(&serialized, false), Some(7));
        assert_eq!(complete_record_len(&serialized[..6], false), None);
        assert_eq!(record.aead_seq(false, 7), 7);
    }

    #[test]
    fn oversized_record_rejected() {
        let mut header = vec![0x17, 0x03, 0x03];
        header.extend_from_slice(&((MAX_CIPHERTEXT_LEN + 1) as u16).to_be_bytes());
        header.resize(header.len() + MAX_CIPHERTEXT_LEN + 1, 0);
        assert!(Record::parse(&header, false).is_err());
    }
}
