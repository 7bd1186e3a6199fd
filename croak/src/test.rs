#![allow(dead_code)]

use ::std::sync::atomic::{AtomicU64, Ordering};
use ::std::sync::{Arc, Mutex};
use embedded_time::rate::Fraction;
use embedded_time::Instant;
use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::net::{Addrd, Socket};
use crate::time::Timeout;

pub(crate) fn dummy_addr() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 8080))
}

pub(crate) fn dummy_addr_2() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 8080))
}

/// Platform implementor using mocks for clock and sock
#[derive(Debug, Clone, Copy)]
pub(crate) struct Test;

impl crate::platform::Platform for Test {
  type Clock = ClockMock;
  type Socket = SockMock;
}

/// A clock that only moves when the test says so. Clones share the
/// same time source, so a test can keep one half and hand the other to
/// the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClockMock(Arc<AtomicU64>);

impl ClockMock {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn set(&self, micros: u64) {
    self.0.store(micros, Ordering::SeqCst);
  }

  pub(crate) fn instant(n: u64) -> Instant<Self> {
    Instant::new(n)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.load(Ordering::SeqCst)))
  }
}

/// A mocked socket. Clones share the same queues, so a test can keep
/// one half and hand the other to the engine.
#[derive(Debug, Default, Clone)]
pub(crate) struct SockMock {
  /// Inbound bytes from remote sockets. Address represents the sender
  pub(crate) rx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
  /// Outbound bytes to remote sockets. Address represents the destination
  pub(crate) tx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
}

impl SockMock {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// The first non-empty datagram sent so far, skipping the
  /// zero-length wake-ups the engine sends itself.
  pub(crate) fn sent(&self, n: usize) -> Option<Addrd<Vec<u8>>> {
    self.tx.lock()
           .unwrap()
           .iter()
           .filter(|d| !d.data().is_empty())
           .nth(n)
           .cloned()
  }

  pub(crate) fn push_rx(&self, dgram: Addrd<Vec<u8>>) {
    self.rx.lock().unwrap().push(dgram);
  }

  /// Count of non-empty datagrams sent so far
  pub(crate) fn sent_count(&self) -> usize {
    self.tx.lock()
           .unwrap()
           .iter()
           .filter(|d| !d.data().is_empty())
           .count()
  }
}

impl Socket for SockMock {
  type Error = ();

  fn bind(_: SocketAddr) -> Result<Self, Self::Error> {
    Ok(Self::new())
  }

  fn local_addr(&self) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5683))
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.tx.lock().unwrap().push(msg.map(Vec::from));
    Ok(())
  }

  fn recv(&self, buf: &mut [u8], _timeout: Timeout) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut rx = self.rx.lock().unwrap();

    if rx.is_empty() {
      return Err(nb::Error::WouldBlock);
    }

    let dgram = rx.remove(0);
    buf[..dgram.data().len()].copy_from_slice(dgram.data());
    Ok(dgram.map(|bytes| bytes.len()))
  }
}
