use crate::net::Socket;
use crate::platform::Platform;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy)]
pub enum When {
  /// We were polling for a message when the error occurred
  Polling,
  /// We were sending a message
  Sending,
  /// We were building a message or mutating engine state
  Building,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what<P: Platform>(self, what: What<P>) -> Error<P> {
    Error { when: self, what }
  }
}

/// An error encounterable from within the engine
pub struct Error<P: Platform> {
  /// What happened?
  pub what: What<P>,
  /// What were we doing when it happened?
  pub when: When,
}

impl<P: Platform> core::fmt::Debug for Error<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Error").field("what", &self.what).field("when", &self.when).finish()
  }
}

/// A contextless error with some additional debug data attached.
pub enum What<P: Platform> {
  /// Some socket operation (e.g. sending a datagram) failed
  SockError(<P::Socket as Socket>::Error),
  /// The clock failed to provide timing
  ClockError,
  /// The request table, retransmit pool, or listener registry is
  /// full; nothing was sent or registered
  NoSlot,
  /// The dispatch mailbox is full, so a sent request could not be
  /// tracked; the send was rolled back
  MailboxFull,
  /// A blocking send was attempted from the dispatch context, which
  /// would deadlock the engine
  WouldBlockDispatch,
  /// Only Confirmable and Non-confirmable messages can be sent as
  /// requests or notifications
  IllegalType(croak_msg::Type),
  /// No observer is registered for the resource
  NoObserver,
  /// Serializing a message into its buffer failed
  Build(croak_msg::BuildError),
  /// Only link-format resource listings are supported
  UnsupportedFormat,
}

impl<P: Platform> core::fmt::Debug for What<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | What::SockError(e) => f.debug_tuple("SockError").field(e).finish(),
      | What::ClockError => write!(f, "ClockError"),
      | What::NoSlot => write!(f, "NoSlot"),
      | What::MailboxFull => write!(f, "MailboxFull"),
      | What::WouldBlockDispatch => write!(f, "WouldBlockDispatch"),
      | What::IllegalType(ty) => f.debug_tuple("IllegalType").field(ty).finish(),
      | What::NoObserver => write!(f, "NoObserver"),
      | What::Build(e) => f.debug_tuple("Build").field(e).finish(),
      | What::UnsupportedFormat => write!(f, "UnsupportedFormat"),
    }
  }
}
