use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;

/// Finished. The body is the verify_data, whose length the negotiated
/// version and suite decide: 12 bytes for TLS 1.0 to 1.2, 36 for SSL 3.0,
/// the hash length for TLS 1.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Buf,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Self {
        Finished {
            verify_data: Buf::from_slice(verify_data),
        }
    }

    pub fn parse(input: &[u8], verify_data_len: usize) -> IResult<&[u8], Finished> {
        let (input, verify_data) = take(verify_data_len)(input)?;
        Ok((input, Finished::new(verify_data)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.verify_data);
    }
}
