use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use embedded_time::rate::Fraction;
use no_std_net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::net::{Addrd, Socket};
use crate::time::Timeout;

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let elapsed = std::time::Instant::now().duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn bind(addr: SocketAddr) -> Result<Self, Self::Error> {
    UdpSocket::bind(addr)
  }

  fn local_addr(&self) -> SocketAddr {
    UdpSocket::local_addr(self).unwrap_or_else(|_| {
                                 SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
                               })
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    match self.send_to(msg.data(), msg.addr()) {
      | Ok(_) => Ok(()),
      | Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
      | Err(e) => Err(nb::Error::Other(e)),
    }
  }

  fn recv(&self, buf: &mut [u8], timeout: Timeout) -> nb::Result<Addrd<usize>, Self::Error> {
    let dur = match timeout {
      // zero means "no timeout" to the OS; clamp away from it
      | Timeout::Millis(ms) => Some(Duration::from_millis(ms.max(1))),
      | Timeout::Never => None,
    };
    self.set_read_timeout(dur).map_err(nb::Error::Other)?;

    match self.recv_from(buf) {
      | Ok((n, addr)) => Ok(Addrd(n, addr)),
      | Err(e)
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
      {
        Err(nb::Error::WouldBlock)
      },
      | Err(e) => Err(nb::Error::Other(e)),
    }
  }
}
