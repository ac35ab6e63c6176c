use crate::buffer::Buf;
use crate::error::Error;

/// ChangeCipherSpec body. Exactly one byte of value 1.
pub const CHANGE_CIPHER_SPEC: u8 = 1;

/// Validate a ChangeCipherSpec record body.
///
/// Any other length or value is an unexpected_message.
pub fn parse(body: &[u8]) -> Result<(), Error> {
    match body {
        [CHANGE_CIPHER_SPEC] => Ok(()),
        _ => Err(Error::unexpected_message(format!(
            "malformed ChangeCipherSpec of {} bytes",
            body.len()
        ))),
    }
}

pub fn serialize(output: &mut Buf) {
    output.push(CHANGE_CIPHER_SPEC);
}
