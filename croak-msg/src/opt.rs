//! CoAP option serialization.
//!
//! Options are carried on the wire as a delta-encoded sequence: each
//! option header stores the difference between its number and the
//! previous option's number, which is why every writer here takes the
//! previously written option number and why callers must emit options
//! in strictly ascending numeric order.
//!
//! See [RFC7252 Section 3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-3.1)

use tinyvec::ArrayVec;

use crate::parse_error::ParseError;

/// Observe (RFC 7641)
pub const OBSERVE: u16 = 6;
/// Uri-Path
pub const URI_PATH: u16 = 11;
/// Content-Format
pub const CONTENT_FORMAT: u16 = 12;
/// Uri-Query
pub const URI_QUERY: u16 = 15;

/// Errors encounterable while building a message into a buffer
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum BuildError {
  /// The PDU buffer is too small for what was written into it
  PduTooSmall,
  /// A request's path does not begin with `/`
  PathFormat,
  /// The options overran the gap reserved for them and collided with
  /// the payload
  OptionsOverflow,
  /// The query buffer cannot hold another key/value pair
  QueryOverflow,
  /// The path buffer cannot hold the requested path
  PathOverflow,
}

/// Split a delta or length into its 4-bit header nibble and extended
/// bytes, per the wire format: values 0-12 are stored in the nibble,
/// 13-268 as nibble 13 plus one byte, and larger as nibble 14 plus two.
pub(crate) fn nibble(val: u16) -> (u8, ArrayVec<[u8; 2]>) {
  let mut ext = ArrayVec::new();
  match val {
    | n if n >= 269 => {
      ext.extend_from_slice(&(n - 269).to_be_bytes());
      (14, ext)
    },
    | n if n >= 13 => {
      ext.push((n - 13) as u8);
      (13, ext)
    },
    | n => (n as u8, ext),
  }
}

/// Decode a delta or length nibble, consuming extended bytes from
/// `bytes` at `*cur` as the nibble demands.
pub(crate) fn nibble_ext(head: u8, bytes: &[u8], cur: &mut usize) -> Result<u16, ParseError> {
  match head {
    | 13 => {
      let b = *bytes.get(*cur).ok_or_else(ParseError::eof)?;
      *cur += 1;
      Ok(b as u16 + 13)
    },
    | 14 => match bytes.get(*cur..*cur + 2) {
      | Some(&[a, b]) => {
        *cur += 2;
        u16::from_be_bytes([a, b]).checked_add(269)
                                  .ok_or(ParseError::OptionTooLarge)
      },
      | _ => Err(ParseError::eof()),
    },
    | 15 => Err(ParseError::ReservedOption),
    | n => Ok(n as u16),
  }
}

/// Serialize one option into the front of `buf`.
///
/// `last_num` is the number of the option written immediately before
/// this one (0 if none); `num` must not be less than it. Returns the
/// number of bytes written.
pub fn put_option(buf: &mut [u8],
                  last_num: u16,
                  num: u16,
                  value: &[u8])
                  -> Result<usize, BuildError> {
  let (delta, delta_ext) = nibble(num - last_num);
  let (len, len_ext) = nibble(value.len() as u16);

  let needed = 1 + delta_ext.len() + len_ext.len() + value.len();
  if buf.len() < needed {
    return Err(BuildError::PduTooSmall);
  }

  buf[0] = (delta << 4) | len;
  let mut pos = 1;
  buf[pos..pos + delta_ext.len()].copy_from_slice(&delta_ext);
  pos += delta_ext.len();
  buf[pos..pos + len_ext.len()].copy_from_slice(&len_ext);
  pos += len_ext.len();
  buf[pos..pos + value.len()].copy_from_slice(value);

  Ok(needed)
}

/// Serialize a `/`-delimited path (or `&`-delimited query string) as a
/// run of repeated options, one per segment. Empty segments are
/// skipped, so a leading `/` or `&` is harmless.
///
/// Returns the number of bytes written.
pub fn put_option_uri(buf: &mut [u8],
                      last_num: u16,
                      uri: &[u8],
                      num: u16)
                      -> Result<usize, BuildError> {
  let sep = if num == URI_QUERY { b'&' } else { b'/' };

  let mut written = 0;
  let mut last = last_num;
  for seg in uri.split(|b| *b == sep).filter(|seg| !seg.is_empty()) {
    written += put_option(&mut buf[written..], last, num, seg)?;
    last = num;
  }

  Ok(written)
}

/// The minimal big-endian encoding of an Observe counter: the non-zero
/// tail of its low 24 bits, 0-3 bytes.
pub fn observe_value(val: u32) -> ArrayVec<[u8; 3]> {
  let be = (val & 0x00FF_FFFF).to_be_bytes();
  let tail = be[1..].iter()
                    .position(|b| *b != 0)
                    .map(|i| &be[1 + i..])
                    .unwrap_or(&[]);

  let mut out = ArrayVec::new();
  out.extend_from_slice(tail);
  out
}

/// Decode an Observe option value (up to 3 bytes, big-endian).
pub(crate) fn observe_from_bytes(bytes: &[u8]) -> Result<u32, ParseError> {
  if bytes.len() > 3 {
    return Err(ParseError::ObserveTooLong(bytes.len()));
  }

  Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}
