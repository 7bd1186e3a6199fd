//! The contract consumed from the DTLS sibling adapter.
//!
//! The engine itself never touches ciphertext. Security is provided by
//! a wrapper socket that translates between encrypted datagrams on the
//! wire and cleartext [`Socket`] operations of the same shape:
//! `send` becomes encrypt-and-send, `recv` becomes decrypt-and-deliver,
//! and [`Socket::insecure_send`] reaches the inner transport directly
//! (the engine uses it for its own loopback wake-ups, which must not
//! enter the handshake machinery).
//!
//! This module only pins down the identifiers and records the adapter
//! and the engine must agree on.

use crate::net::Socket;

/// Cipher suites the adapter is expected to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CipherSuite {
  /// TLS_PSK_WITH_AES_128_CCM_8 (RFC 6655)
  PskAes128Ccm8,
  /// TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8 (RFC 7251)
  EcdheEcdsaAes128Ccm8,
}

impl CipherSuite {
  /// The IANA identifier of this suite
  pub fn id(&self) -> u16 {
    match self {
      | CipherSuite::PskAes128Ccm8 => 0xC0A8,
      | CipherSuite::EcdheEcdsaAes128Ccm8 => 0xC0AE,
    }
  }
}

/// Pre-shared-key credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Psk<'a> {
  /// The PSK identity presented to the peer
  pub identity: &'a [u8],
  /// The key itself
  pub key: &'a [u8],
}

/// A socket that wraps a cleartext transport in DTLS.
///
/// Implementations hold the inner socket and a session table; the
/// engine only needs to know which suites are on offer and how to get
/// at the cleartext transport underneath.
pub trait SecureSocket: Socket {
  /// The wrapped transport
  type Inner: Socket;

  /// The cipher suites this socket offers during the handshake
  fn cipher_suites(&self) -> &[CipherSuite];

  /// The cleartext transport underneath
  fn inner(&self) -> &Self::Inner;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn suite_ids() {
    assert_eq!(CipherSuite::PskAes128Ccm8.id(), 0xC0A8);
    assert_eq!(CipherSuite::EcdheEcdsaAes128Ccm8.id(), 0xC0AE);
  }
}
