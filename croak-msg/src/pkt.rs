use tinyvec::ArrayVec;

use crate::code::{Code, CodeKind, ContentFormat};
use crate::id::Id;
use crate::opt::{self, BuildError};
use crate::parse_error::ParseError;
use crate::token::Token;
use crate::ty::Type;

/// Maximum bytes of decoded Uri-Path stored in a [`Packet`]
pub const URL_MAX: usize = 64;

/// Maximum bytes of decoded Uri-Query stored in a [`Packet`]
pub const QS_MAX: usize = 64;

/// The byte separating the options from the payload when a payload is
/// present
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Gap reserved between the header and the payload window when a
/// request packet is converted to a response in place; large enough
/// for an Observe option and a Content-Format option.
pub(crate) const RESP_OPTIONS_GAP: usize = 8;

/// # Packet
///
/// The decoded view of one CoAP message.
///
/// A `Packet` lives for a single handler invocation or a single send: it
/// is parsed from an incoming datagram with [`Packet::parse`], or built
/// for sending with [`Packet::init`] and sealed with [`Packet::finish`].
///
/// Header fields, token, and the decoded Uri-Path and Uri-Query are
/// owned copies; the payload is a window into the caller's PDU buffer,
/// accessed through [`Packet::payload`] / [`Packet::payload_mut`].
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Packet {
  /// see [`Type`]
  pub ty: Type,
  /// see [`Code`]
  pub code: Code,
  /// see [`Id`]
  pub id: Id,
  /// see [`Token`]
  pub token: Token,
  /// Decoded Uri-Path, `/`-joined with a leading `/`
  pub path: ArrayVec<[u8; URL_MAX]>,
  /// Decoded Uri-Query, `&`-joined
  pub query: ArrayVec<[u8; QS_MAX]>,
  /// Content-Format option, if present
  pub content_format: Option<ContentFormat>,
  /// Observe option value, if present
  pub observe: Option<u32>,
  payload_off: usize,
  payload_len: usize,
}

impl Packet {
  /// Parse a received datagram.
  ///
  /// Uri-Path segments are joined into [`Packet::path`], Uri-Query
  /// segments into [`Packet::query`]; Content-Format and Observe are
  /// decoded; any other option is skipped.
  pub fn parse(bytes: &[u8]) -> Result<Packet, ParseError> {
    if bytes.len() < 4 {
      return Err(ParseError::eof());
    }

    let ver = bytes[0] >> 6;
    if ver != 1 {
      return Err(ParseError::InvalidVersion(ver));
    }

    let ty = Type::from_byte1(bytes[0])?;
    let tkl = (bytes[0] & 0b1111) as usize;
    if tkl > 8 {
      return Err(ParseError::InvalidTokenLength(tkl as u8));
    }

    let code = Code::from(bytes[1]);
    let id = Id::from_be_bytes([bytes[2], bytes[3]]);

    let token = bytes.get(4..4 + tkl).ok_or_else(ParseError::eof)?;
    let token = Token::from_slice(token);

    let mut pkt = Packet { ty,
                           code,
                           id,
                           token,
                           path: Default::default(),
                           query: Default::default(),
                           content_format: None,
                           observe: None,
                           payload_off: bytes.len(),
                           payload_len: 0 };

    let mut cur = 4 + tkl;
    let mut num = 0u16;
    while cur < bytes.len() {
      let head = bytes[cur];
      cur += 1;

      if head == PAYLOAD_MARKER {
        if cur == bytes.len() {
          return Err(ParseError::PayloadMarkerWithoutPayload);
        }
        pkt.payload_off = cur;
        pkt.payload_len = bytes.len() - cur;
        break;
      }

      let delta = opt::nibble_ext(head >> 4, bytes, &mut cur)?;
      let len = opt::nibble_ext(head & 0b1111, bytes, &mut cur)? as usize;
      num = num.saturating_add(delta);

      let value = bytes.get(cur..cur + len).ok_or_else(ParseError::eof)?;
      cur += len;

      match num {
        | opt::OBSERVE => pkt.observe = Some(opt::observe_from_bytes(value)?),
        | opt::URI_PATH => {
          if pkt.path.len() + 1 + value.len() > URL_MAX {
            return Err(ParseError::PathTooLong);
          }
          pkt.path.push(b'/');
          pkt.path.extend_from_slice(value);
        },
        | opt::CONTENT_FORMAT => {
          let cf = value.iter().fold(0u16, |acc, b| (acc << 8) | *b as u16);
          pkt.content_format = Some(ContentFormat(cf));
        },
        | opt::URI_QUERY => {
          let sep = usize::from(!pkt.query.is_empty());
          if pkt.query.len() + sep + value.len() > QS_MAX {
            return Err(ParseError::QueryTooLong);
          }
          if sep > 0 {
            pkt.query.push(b'&');
          }
          pkt.query.extend_from_slice(value);
        },
        // elective options we don't model are skipped
        | _ => (),
      }
    }

    Ok(pkt)
  }

  /// Start building a fresh outgoing message.
  ///
  /// Writes the header into the front of `buf` and positions the
  /// payload window after `opts_gap` reserved bytes, so that the
  /// options can be serialized later by [`Packet::finish`] without
  /// disturbing a payload that has already been written.
  pub fn init(buf: &mut [u8],
              ty: Type,
              token: Token,
              code: Code,
              id: Id,
              opts_gap: usize)
              -> Result<Packet, BuildError> {
    let hdr_len = build_hdr(buf, ty, &token, code, id)?;
    let off = hdr_len + opts_gap;
    if off > buf.len() {
      return Err(BuildError::PduTooSmall);
    }

    Ok(Packet { ty,
                code,
                id,
                token,
                path: Default::default(),
                query: Default::default(),
                content_format: None,
                observe: None,
                payload_off: off,
                payload_len: buf.len() - off })
  }

  /// Convert this packet, a just-received request, into its response,
  /// in place, reusing `buf` as the response PDU buffer.
  ///
  /// A Confirmable request becomes a piggy-backed Acknowledgement; a
  /// Non-confirmable request is answered with a Non-confirmable
  /// response. Token and message ID are preserved, as is a pending
  /// Observe value (so a registration response carries its counter).
  pub fn init_response(&mut self, buf: &mut [u8], code: Code) -> Result<(), BuildError> {
    if self.ty == Type::Con {
      self.ty = Type::Ack;
    }
    self.code = code;

    let hdr_len = build_hdr(buf, self.ty, &self.token, code, self.id)?;
    let off = hdr_len + RESP_OPTIONS_GAP;
    if off > buf.len() {
      return Err(BuildError::PduTooSmall);
    }

    self.content_format = None;
    self.payload_off = off;
    self.payload_len = buf.len() - off;
    Ok(())
  }

  /// Set the request path. Validity (leading `/`) is checked by
  /// [`Packet::finish`].
  pub fn set_path(&mut self, path: &str) -> Result<(), BuildError> {
    if path.len() > URL_MAX {
      return Err(BuildError::PathOverflow);
    }

    self.path.clear();
    self.path.extend_from_slice(path.as_bytes());
    Ok(())
  }

  /// Append one key (and optional value) to the request query string.
  ///
  /// ```
  /// use croak_msg::{code, Id, Packet, Token, Type};
  ///
  /// let mut buf = [0u8; 128];
  /// let mut pkt =
  ///   Packet::init(&mut buf, Type::Con, Token::default(), code::GET, Id(1), 32).unwrap();
  /// pkt.add_qstring("page", Some("2")).unwrap();
  /// pkt.add_qstring("all", None).unwrap();
  /// assert_eq!(&pkt.query[..], b"page=2&all");
  /// ```
  pub fn add_qstring(&mut self, key: &str, val: Option<&str>) -> Result<(), BuildError> {
    let sep = usize::from(!self.query.is_empty());
    let needed = sep + key.len() + val.map(|v| v.len() + 1).unwrap_or(0);
    if self.query.len() + needed > QS_MAX {
      return Err(BuildError::QueryOverflow);
    }

    if sep > 0 {
      self.query.push(b'&');
    }
    self.query.extend_from_slice(key.as_bytes());
    if let Some(val) = val {
      self.query.push(b'=');
      self.query.extend_from_slice(val.as_bytes());
    }
    Ok(())
  }

  /// Serialize the options and seal the message.
  ///
  /// Options are emitted in ascending number order: Observe (success
  /// responses only), Uri-Path (requests only), Content-Format, and
  /// Uri-Query (requests only). If a payload is present it is moved
  /// down flush against the options, after the payload marker.
  ///
  /// Returns the total length of the PDU within `buf`.
  pub fn finish(&mut self,
                buf: &mut [u8],
                payload_len: usize,
                format: Option<ContentFormat>)
                -> Result<usize, BuildError> {
    self.content_format = format;
    self.payload_len = payload_len;

    let mut pos = self.hdr_len();
    let mut last = 0u16;

    // Observe is only emitted on notifications and registration
    // responses, both success-class
    if self.code.class == 2 {
      if let Some(val) = self.observe {
        let val = opt::observe_value(val);
        pos += opt::put_option(&mut buf[pos..], last, opt::OBSERVE, &val)?;
        last = opt::OBSERVE;
      }
    }

    if self.code.kind() == CodeKind::Request && !self.path.is_empty() {
      if self.path[0] != b'/' {
        return Err(BuildError::PathFormat);
      }
      pos += opt::put_option_uri(&mut buf[pos..], last, &self.path, opt::URI_PATH)?;
      last = opt::URI_PATH;
    }

    if let Some(cf) = self.content_format {
      pos += opt::put_option(&mut buf[pos..], last, opt::CONTENT_FORMAT, &cf.bytes())?;
      last = opt::CONTENT_FORMAT;
    }

    if self.code.kind() == CodeKind::Request && !self.query.is_empty() {
      pos += opt::put_option_uri(&mut buf[pos..], last, &self.query, opt::URI_QUERY)?;
    }

    if pos > self.payload_off {
      // the options ran past their reserved gap and into the payload
      return Err(BuildError::OptionsOverflow);
    }

    if payload_len > 0 {
      if pos + 1 + payload_len > buf.len() || self.payload_off + payload_len > buf.len() {
        return Err(BuildError::PduTooSmall);
      }
      buf[pos] = PAYLOAD_MARKER;
      pos += 1;
      buf.copy_within(self.payload_off..self.payload_off + payload_len, pos);
      self.payload_off = pos;
      pos += payload_len;
    }

    Ok(pos)
  }

  /// Length of the header (including token) at the front of the PDU
  pub fn hdr_len(&self) -> usize {
    4 + self.token.len()
  }

  /// The payload window of this packet within its PDU buffer.
  ///
  /// For a parsed packet this is the received payload; for a packet
  /// being built it is the space available for one.
  pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
    &buf[self.payload_off..self.payload_off + self.payload_len]
  }

  /// Mutable access to the payload window (see [`Packet::payload`])
  pub fn payload_mut<'a>(&self, buf: &'a mut [u8]) -> &'a mut [u8] {
    &mut buf[self.payload_off..self.payload_off + self.payload_len]
  }

  /// Length of the payload window
  pub fn payload_len(&self) -> usize {
    self.payload_len
  }

  /// The decoded Uri-Path (leading `/`, segments `/`-joined)
  pub fn path(&self) -> &[u8] {
    &self.path
  }

  /// The Observe option value, if present
  pub fn observe(&self) -> Option<u32> {
    self.observe
  }

  /// Is the Observe option present?
  pub fn has_observe(&self) -> bool {
    self.observe.is_some()
  }

  /// Remove the Observe option from the outgoing message, degrading a
  /// registration into a normal one-shot exchange.
  pub fn clear_observe(&mut self) {
    self.observe = None;
  }
}

/// Write a message header (and token) into the front of `buf`,
/// returning the number of bytes written.
pub fn build_hdr(buf: &mut [u8],
                 ty: Type,
                 token: &Token,
                 code: Code,
                 id: Id)
                 -> Result<usize, BuildError> {
  let hdr_len = 4 + token.len();
  if buf.len() < hdr_len {
    return Err(BuildError::PduTooSmall);
  }

  buf[0] = 0b0100_0000 | (u8::from(ty) << 4) | token.len() as u8;
  buf[1] = code.into();
  buf[2..4].copy_from_slice(&id.to_be_bytes());
  buf[4..hdr_len].copy_from_slice(token.as_bytes());
  Ok(hdr_len)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::code;

  #[test]
  fn parse_get_request() {
    let bytes = [0x41, 0x01, 0x12, 0x34, 0xAB, 0xB4, b'p', b'i', b'n', b'g'];

    let pkt = Packet::parse(&bytes).unwrap();
    assert_eq!(pkt.ty, Type::Con);
    assert_eq!(pkt.code, code::GET);
    assert_eq!(pkt.id, Id(0x1234));
    assert_eq!(pkt.token.as_bytes(), &[0xAB]);
    assert_eq!(pkt.path(), b"/ping");
    assert_eq!(pkt.payload_len(), 0);
    assert!(!pkt.has_observe());
  }

  #[test]
  fn parse_multi_segment_path_and_query() {
    // CON GET, tkl 0, Uri-Path a/b, Uri-Query x=1 y
    let bytes = [0x40, 0x01, 0x00, 0x01, 0xB1, b'a', 0x01, b'b', 0x43, b'x', b'=', b'1', 0x01,
                 b'y'];

    let pkt = Packet::parse(&bytes).unwrap();
    assert_eq!(pkt.path(), b"/a/b");
    assert_eq!(&pkt.query[..], b"x=1&y");
  }

  #[test]
  fn parse_observe_register() {
    // CON GET id 1 token F0 0D, Observe = 0 (zero-length), Uri-Path t
    let bytes = [0x42, 0x01, 0x00, 0x01, 0xF0, 0x0D, 0x60, 0x51, b't'];

    let pkt = Packet::parse(&bytes).unwrap();
    assert_eq!(pkt.observe(), Some(0));
    assert_eq!(pkt.path(), b"/t");
    assert_eq!(pkt.token.as_bytes(), &[0xF0, 0x0D]);
  }

  #[test]
  fn parse_payload() {
    let bytes = [0x50, 0x02, 0x00, 0x07, 0xFF, b'h', b'i'];

    let pkt = Packet::parse(&bytes).unwrap();
    assert_eq!(pkt.ty, Type::Non);
    assert_eq!(pkt.payload(&bytes), b"hi");
  }

  #[test]
  fn parse_rejects_garbage() {
    assert_eq!(Packet::parse(&[0x40, 0x01]), Err(ParseError::eof()));
    assert_eq!(Packet::parse(&[0x00, 0x01, 0, 1]),
               Err(ParseError::InvalidVersion(0)));
    assert_eq!(Packet::parse(&[0x49, 0x01, 0, 1]),
               Err(ParseError::InvalidTokenLength(9)));
    assert_eq!(Packet::parse(&[0x40, 0x01, 0, 1, 0xFF]),
               Err(ParseError::PayloadMarkerWithoutPayload));
    // delta nibble 15 that isn't a payload marker
    assert_eq!(Packet::parse(&[0x40, 0x01, 0, 1, 0xF1, 0]),
               Err(ParseError::ReservedOption));
  }

  #[test]
  fn build_and_reparse_request() {
    let mut buf = [0u8; 128];
    let token = Token::from_slice(&[1, 2]);
    let mut pkt =
      Packet::init(&mut buf, Type::Con, token, code::PUT, Id(7), 48).unwrap();
    pkt.set_path("/a/b").unwrap();
    pkt.add_qstring("k", Some("v")).unwrap();
    pkt.payload_mut(&mut buf)[..5].copy_from_slice(b"hello");
    let len = pkt.finish(&mut buf, 5, Some(ContentFormat::TEXT)).unwrap();

    let parsed = Packet::parse(&buf[..len]).unwrap();
    assert_eq!(parsed.ty, Type::Con);
    assert_eq!(parsed.code, code::PUT);
    assert_eq!(parsed.token.as_bytes(), &[1, 2]);
    assert_eq!(parsed.path(), b"/a/b");
    assert_eq!(&parsed.query[..], b"k=v");
    assert_eq!(parsed.content_format, Some(ContentFormat::TEXT));
    assert_eq!(parsed.payload(&buf[..len]), b"hello");
  }

  #[test]
  fn response_in_place() {
    let req = [0x41, 0x01, 0x12, 0x34, 0xAB, 0xB4, b'p', b'i', b'n', b'g'];
    let mut buf = [0u8; 64];
    buf[..req.len()].copy_from_slice(&req);

    let mut pkt = Packet::parse(&buf[..req.len()]).unwrap();
    pkt.init_response(&mut buf, code::CONTENT).unwrap();
    pkt.payload_mut(&mut buf)[..4].copy_from_slice(b"pong");
    let len = pkt.finish(&mut buf, 4, Some(ContentFormat::TEXT)).unwrap();

    let resp = Packet::parse(&buf[..len]).unwrap();
    assert_eq!(resp.ty, Type::Ack);
    assert_eq!(resp.id, Id(0x1234));
    assert_eq!(resp.token.as_bytes(), &[0xAB]);
    assert_eq!(resp.code, code::CONTENT);
    assert_eq!(resp.payload(&buf[..len]), b"pong");
  }

  #[test]
  fn observe_on_success_response() {
    let mut buf = [0u8; 64];
    let mut pkt = Packet::init(&mut buf,
                               Type::Non,
                               Token::from_slice(&[0xF0, 0x0D]),
                               code::CONTENT,
                               Id(9),
                               16).unwrap();
    pkt.observe = Some(0x1234);
    let len = pkt.finish(&mut buf, 0, None).unwrap();

    let parsed = Packet::parse(&buf[..len]).unwrap();
    assert_eq!(parsed.observe(), Some(0x1234));
  }

  #[test]
  fn path_must_start_with_slash() {
    let mut buf = [0u8; 64];
    let mut pkt =
      Packet::init(&mut buf, Type::Con, Token::default(), code::GET, Id(1), 32).unwrap();
    pkt.set_path("oops").unwrap();
    assert_eq!(pkt.finish(&mut buf, 0, None), Err(BuildError::PathFormat));
  }

  #[test]
  fn qstring_overflow() {
    let mut buf = [0u8; 128];
    let mut pkt =
      Packet::init(&mut buf, Type::Con, Token::default(), code::GET, Id(1), 32).unwrap();

    let long = core::str::from_utf8(&[b'x'; QS_MAX]).unwrap();
    assert_eq!(pkt.add_qstring(long, Some("y")),
               Err(BuildError::QueryOverflow));
    // the failed append must not have modified the buffer
    assert!(pkt.query.is_empty());
  }

  #[test]
  fn no_marker_without_payload() {
    let mut buf = [0u8; 64];
    let mut pkt =
      Packet::init(&mut buf, Type::Ack, Token::default(), code::VALID, Id(3), 8).unwrap();
    let len = pkt.finish(&mut buf, 0, None).unwrap();
    assert_ne!(buf[..len].last(), Some(&PAYLOAD_MARKER));
  }
}
