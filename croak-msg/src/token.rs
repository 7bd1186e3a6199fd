use tinyvec::ArrayVec;

/// # Token
///
/// A sequence of 0 to 8 bytes chosen by the client, used to correlate a
/// response with the request that elicited it regardless of the message
/// IDs involved.
///
/// Unlike the [message ID](crate::Id), which pairs an Acknowledgement or
/// Reset with the individual transmission it confirms, the token
/// survives across separate responses and Observe notifications.
///
/// See [RFC7252 Section 5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1)
#[derive(Copy, Clone, Default, PartialEq, PartialOrd, Debug)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Copy up to 8 bytes into a new Token.
  ///
  /// Bytes beyond the 8th are discarded; the wire format cannot carry
  /// them.
  pub fn from_slice(bytes: &[u8]) -> Token {
    let mut buf = ArrayVec::new();
    buf.extend_from_slice(&bytes[..bytes.len().min(8)]);
    Token(buf)
  }

  /// The token bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Length of the token in bytes (0-8)
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Is this the zero-length token?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_from_slice() {
    let t = Token::from_slice(&[1, 2, 3]);
    assert_eq!(t.as_bytes(), &[1, 2, 3]);
    assert_eq!(t.len(), 3);

    let long = Token::from_slice(&[0; 12]);
    assert_eq!(long.len(), 8);
  }
}
