use no_std_net::SocketAddr;

use crate::time::Timeout;

/// Data that came from (or is bound for) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the address and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// A CoAP network socket
///
/// This mirrors the UDP socket traits in embedded-nal, but allows us to
/// implement them for foreign types (like `std::net::UdpSocket`), and
/// carries the receive timeout in the call: the dispatch loop decides
/// per receive whether it may block forever or must come back to
/// service timers.
pub trait Socket: Sized {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Bind the socket to a local address
  fn bind(addr: SocketAddr) -> Result<Self, Self::Error>;

  /// Get the local address this socket is bound to
  fn local_addr(&self) -> SocketAddr;

  /// Send a message to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Send a message to a remote address, bypassing DTLS.
  ///
  /// If the socket type implementing this trait does not participate
  /// in DTLS, then this is just an alias for `send`.
  fn insecure_send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send(msg)
  }

  /// Pull one datagram from the socket into `buf`, along with the
  /// address of the sender, waiting at most `timeout`.
  ///
  /// Yields [`nb::Error::WouldBlock`] when the timeout lapses with
  /// nothing received.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message
  /// is larger than the buffer, the excess bytes are dropped and not
  /// considered an error condition.
  fn recv(&self, buf: &mut [u8], timeout: Timeout) -> nb::Result<Addrd<usize>, Self::Error>;
}
