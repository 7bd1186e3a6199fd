use crate::net::Socket;
use crate::time::Clock;

/// Pins the platform-specific pieces the engine is generic over: how
/// time is read and how datagrams move.
///
/// The shared engine state is handed between threads, so both pieces
/// must be thread-safe.
pub trait Platform: Sized + 'static + core::fmt::Debug {
  /// What should we use to keep track of time?
  type Clock: Clock + Send + Sync;

  /// What should we use for networking?
  type Socket: Socket + Send + Sync;
}

/// Platform backed by [`crate::std::Clock`] and [`std::net::UdpSocket`]
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
#[derive(Debug, Clone, Copy)]
pub struct Std;

#[cfg(feature = "std")]
impl Platform for Std {
  type Clock = crate::std::Clock;
  type Socket = ::std::net::UdpSocket;
}
