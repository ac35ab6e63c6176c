//! Handshake message framing.
//!
//! ```text
//! TLS:   msg_type(1) length(3)
//! DTLS:  msg_type(1) length(3) message_seq(2) fragment_offset(3) fragment_length(3)
//! ```
//!
//! Messages are produced unfragmented. Reassembly of DTLS fragments belongs to
//! the transport; a fragment reaching the handshake is a decode error.

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::types::HandshakeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    pub fn len(dtls: bool) -> usize {
        if dtls {
            12
        } else {
            4
        }
    }

    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], Header> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let msg_type = HandshakeType::from_u8(msg_type);

        if !dtls {
            return Ok((
                input,
                Header {
                    msg_type,
                    length,
                    message_seq: 0,
                    fragment_offset: 0,
                    fragment_length: length,
                },
            ));
        }

        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;
        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset > 0 || self.fragment_length != self.length
    }

    pub fn serialize(&self, dtls: bool, output: &mut Buf) -> Result<(), CodecError> {
        codec::put_u8(output, self.msg_type.as_u8());
        codec::put_u24(output, self.length)?;
        if dtls {
            codec::put_u16(output, self.message_seq);
            codec::put_u24(output, self.fragment_offset)?;
            codec::put_u24(output, self.fragment_length)?;
        }
        Ok(())
    }
}

/// Length of the first complete message in `input`, header included.
///
/// `None` while more bytes are needed.
pub fn complete_message_len(input: &[u8], dtls: bool) -> Option<usize> {
    let header_len = Header::len(dtls);
    if input.len() < header_len {
        return None;
    }
    let (_, header) = Header::parse(input, dtls).ok()?;
    let total = header_len + header.fragment_length as usize;
    (input.len() >= total).then_some(total)
}

/// One complete handshake message with its body still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    pub body: Buf,
}

impl HandshakeMessage {
    pub fn new(msg_type: HandshakeType, body: Buf) -> Self {
        HandshakeMessage {
            msg_type,
            message_seq: 0,
            body,
        }
    }

    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], HandshakeMessage> {
        let (rest, header) = Header::parse(input, dtls)?;
        if header.is_fragment() {
            return Err(codec::malformed(input));
        }
        let (rest, body) = take(header.length as usize)(rest)?;
        Ok((
            rest,
            HandshakeMessage {
                msg_type: header.msg_type,
                message_seq: header.message_seq,
                body: Buf::from_slice(body),
            },
        ))
    }

    pub fn header(&self) -> Header {
        let length = self.body.len() as u32;
        Header {
            msg_type: self.msg_type,
            length,
            message_seq: self.message_seq,
            fragment_offset: 0,
            fragment_length: length,
        }
    }

    pub fn serialize(&self, dtls: bool, output: &mut Buf) -> Result<(), CodecError> {
        if self.body.len() > codec::U24_MAX {
            return Err(CodecError::FieldOverflow {
                len: self.body.len(),
                max: codec::U24_MAX,
            });
        }
        self.header().serialize(dtls, output)?;
        output.extend_from_slice(&self.body);
        Ok(())
    }

    /// The message as it goes on the wire and into the transcript.
    pub fn encode(&self, dtls: bool) -> Result<Buf, CodecError> {
        let mut out = Buf::with_capacity(Header::len(dtls) + self.body.len());
        self.serialize(dtls, &mut out)?;
        Ok(out)
    }

    /// Messages with an empty body: HelloRequest, ServerHelloDone,
    /// EndOfEarlyData.
    pub fn expect_empty(&self) -> Result<(), CodecError> {
        if self.body.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingData(self.body.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DTLS_MESSAGE: &[u8] = &[
        0x14, // Finished
        0x00, 0x00, 0x03, // Length
        0x00, 0x05, // Message sequence
        0x00, 0x00, 0x00, // Fragment offset
        0x00, 0x00, 0x03, // Fragment length
        0x01, 0x02, 0x03, // Body
    ];

    #[test]
    fn dtls_roundtrip() {
        let mut msg = HandshakeMessage::new(HandshakeType::Finished, Buf::from_slice(&[1, 2, 3]));
        msg.message_seq = 5;

        let encoded = msg.encode(true).unwrap();
        assert_eq!(&encoded[..], DTLS_MESSAGE);

        let (rest, parsed) = HandshakeMessage::parse(&encoded, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, msg);
    }

    #[test]
    fn tls_header_is_four_bytes() {
        let msg = HandshakeMessage::new(HandshakeType::ServerHelloDone, Buf::new());
        let encoded = msg.encode(false).unwrap();
        assert_eq!(&encoded[..], &[0x0e, 0x00, 0x00, 0x00]);
        msg.expect_empty().unwrap();
    }

    #[test]
    fn complete_length_waits_for_body() {
        let encoded = HandshakeMessage::new(HandshakeType::Finished, Buf::from_slice(&[9; 12]))
            .encode(false)
            .unwrap();
        assert_eq!(complete_message_len(&encoded[..3], false), None);
        assert_eq!(complete_message_len(&encoded[..10], false), None);
        assert_eq!(complete_message_len(&encoded, false), Some(16));
    }

    #[test]
    fn fragment_rejected() {
        let mut fragment = DTLS_MESSAGE.to_vec();
        fragment[11] = 0x02; // fragment_length 2 of 3
        fragment.pop();
        assert!(HandshakeMessage::parse(&fragment, true).is_err());
    }
}
