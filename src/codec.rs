//! Wire primitives.
//!
//! Big-endian unsigned integers of 8/16/24/32 bits and byte vectors with
//! 1/2/3-byte length prefixes. Reads go through [`Reader`], a bounded cursor
//! that fails with [`CodecError::InsufficientData`] rather than clamping.
//! Writes append to a [`Buf`] and fail with [`CodecError::FieldOverflow`] when
//! a value does not fit its field.
//!
//! Message parsers are written as nom parsers; [`parse_all`] adapts them to the
//! same error type and rejects trailing bytes.

use nom::error::{Error as NomError, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u24, be_u32, be_u8};
use nom::IResult;
use thiserror::Error;

use crate::buffer::Buf;

/// Largest value representable in a 24-bit field.
pub const U24_MAX: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("insufficient data: field needs {needed} bytes, {remaining} remaining")]
    InsufficientData { needed: usize, remaining: usize },

    #[error("field overflow: {len} does not fit a field of max {max}")]
    FieldOverflow { len: usize, max: usize },

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("{0} unexpected trailing bytes")]
    TrailingData(usize),
}

/// Bounded read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Reader { input, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Offset of the cursor from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unconsumed tail.
    pub fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    fn parse<O>(
        &mut self,
        needed: usize,
        f: fn(&'a [u8]) -> IResult<&'a [u8], O>,
    ) -> Result<O, CodecError> {
        let rest = self.rest();
        match f(rest) {
            Ok((tail, out)) => {
                self.pos = self.input.len() - tail.len();
                Ok(out)
            }
            Err(_) => Err(CodecError::InsufficientData {
                needed,
                remaining: rest.len(),
            }),
        }
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        self.parse(1, be_u8)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        self.parse(2, be_u16)
    }

    pub fn u24(&mut self) -> Result<u32, CodecError> {
        self.parse(3, be_u24)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.parse(4, be_u32)
    }

    /// Take exactly `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(CodecError::InsufficientData {
                needed: n,
                remaining,
            });
        }
        let out = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn vec8(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }

    pub fn vec16(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    pub fn vec24(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u24()? as usize;
        self.bytes(len)
    }

    /// Fail unless every byte was consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingData(n)),
        }
    }
}

pub fn put_u8(out: &mut Buf, v: u8) {
    out.push(v);
}

pub fn put_u16(out: &mut Buf, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24(out: &mut Buf, v: u32) -> Result<(), CodecError> {
    if v as usize > U24_MAX {
        return Err(CodecError::FieldOverflow {
            len: v as usize,
            max: U24_MAX,
        });
    }
    out.extend_from_slice(&v.to_be_bytes()[1..]);
    Ok(())
}

pub fn put_u32(out: &mut Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_vec8(out: &mut Buf, data: &[u8]) -> Result<(), CodecError> {
    let mark = start_vec(out, LengthWidth::U8);
    out.extend_from_slice(data);
    finish_vec(out, mark)
}

pub fn put_vec16(out: &mut Buf, data: &[u8]) -> Result<(), CodecError> {
    let mark = start_vec(out, LengthWidth::U16);
    out.extend_from_slice(data);
    finish_vec(out, mark)
}

pub fn put_vec24(out: &mut Buf, data: &[u8]) -> Result<(), CodecError> {
    let mark = start_vec(out, LengthWidth::U24);
    out.extend_from_slice(data);
    finish_vec(out, mark)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWidth {
    U8,
    U16,
    U24,
}

impl LengthWidth {
    fn bytes(&self) -> usize {
        match self {
            LengthWidth::U8 => 1,
            LengthWidth::U16 => 2,
            LengthWidth::U24 => 3,
        }
    }

    fn max(&self) -> usize {
        match self {
            LengthWidth::U8 => 0xFF,
            LengthWidth::U16 => 0xFFFF,
            LengthWidth::U24 => U24_MAX,
        }
    }
}

/// Placeholder for a length prefix that is filled in by [`finish_vec`].
#[derive(Debug)]
#[must_use]
pub struct LengthMark {
    at: usize,
    width: LengthWidth,
}

/// Reserve a length prefix for a vector whose contents are written next.
pub fn start_vec(out: &mut Buf, width: LengthWidth) -> LengthMark {
    let at = out.len();
    out.resize(at + width.bytes(), 0);
    LengthMark { at, width }
}

/// Backfill the length prefix reserved by [`start_vec`].
pub fn finish_vec(out: &mut Buf, mark: LengthMark) -> Result<(), CodecError> {
    let start = mark.at + mark.width.bytes();
    let len = out.len() - start;
    if len > mark.width.max() {
        return Err(CodecError::FieldOverflow {
            len,
            max: mark.width.max(),
        });
    }
    let be = (len as u32).to_be_bytes();
    let n = mark.width.bytes();
    out[mark.at..start].copy_from_slice(&be[4 - n..]);
    Ok(())
}

// ============================================================================
// nom helpers used by the message parsers
// ============================================================================

pub fn vec8(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u8)(input)
}

pub fn vec16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u16)(input)
}

pub fn vec24(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u24)(input)
}

/// A nom error marking `input` as semantically invalid.
pub fn malformed(input: &[u8]) -> nom::Err<NomError<&[u8]>> {
    nom::Err::Error(NomError::new(input, ErrorKind::Verify))
}

impl From<nom::Err<NomError<&[u8]>>> for CodecError {
    fn from(value: nom::Err<NomError<&[u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(n) => {
                let needed = match n {
                    nom::Needed::Size(s) => s.get(),
                    nom::Needed::Unknown => 1,
                };
                CodecError::InsufficientData {
                    needed,
                    remaining: 0,
                }
            }
            nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
                ErrorKind::Eof | ErrorKind::Complete => CodecError::InsufficientData {
                    needed: e.input.len() + 1,
                    remaining: e.input.len(),
                },
                _ => CodecError::Malformed("message body"),
            },
        }
    }
}

/// Run a nom parser over the whole of `input`.
pub fn parse_all<'a, O, F>(input: &'a [u8], mut parser: F) -> Result<O, CodecError>
where
    F: FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
{
    let (rest, out) = parser(input)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingData(rest.len()));
    }
    Ok(out)
}
