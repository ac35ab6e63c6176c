//! KeyUpdate (RFC 8446 Section 4.6.3)
//!
//! Exactly one byte. Values other than 0 and 1 are an illegal_parameter.

use crate::buffer::Buf;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUpdateRequest {
    UpdateNotRequested,
    UpdateRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    pub request: KeyUpdateRequest,
}

impl KeyUpdate {
    pub fn new(requested: bool) -> Self {
        let request = if requested {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        KeyUpdate { request }
    }

    pub fn is_requested(&self) -> bool {
        self.request == KeyUpdateRequest::UpdateRequested
    }

    pub fn parse(body: &[u8]) -> Result<KeyUpdate, Error> {
        let [value] = body else {
            return Err(Error::decode_error(format!(
                "KeyUpdate body of {} bytes",
                body.len()
            )));
        };
        let request = match *value {
            0 => KeyUpdateRequest::UpdateNotRequested,
            1 => KeyUpdateRequest::UpdateRequested,
            v => return Err(Error::illegal_parameter(format!("KeyUpdate value {}", v))),
        };
        Ok(KeyUpdate { request })
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(match self.request {
            KeyUpdateRequest::UpdateNotRequested => 0,
            KeyUpdateRequest::UpdateRequested => 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDescription;

    #[test]
    fn roundtrip() {
        for requested in [false, true] {
            let ku = KeyUpdate::new(requested);
            let mut serialized = Buf::new();
            ku.serialize(&mut serialized);
            assert_eq!(&serialized[..], &[requested as u8]);
            assert_eq!(KeyUpdate::parse(&serialized).unwrap(), ku);
        }
    }

    #[test]
    fn wrong_length_and_value() {
        let err = KeyUpdate::parse(&[0, 0]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::DecodeError);
        let err = KeyUpdate::parse(&[2]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::IllegalParameter);
    }
}
