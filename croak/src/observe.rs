use croak_msg::Token;
use no_std_net::SocketAddr;

use crate::config::{OBS_CLIENTS_MAX, OBS_REGISTRATIONS_MAX};
use crate::server::Resource;

/// One Observe registration: a remote endpoint (by observer-table
/// index), the resource it watches, and the token its notifications
/// must carry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObsMemo {
  pub(crate) observer: usize,
  pub(crate) resource: &'static Resource,
  pub(crate) token: Token,
}

/// The Observe registry: deduplicated observer endpoints plus the
/// registrations binding them to resources.
///
/// An observer slot is alive iff at least one registration references
/// it; clearing the last registration frees the slot.
#[derive(Debug, Default)]
pub(crate) struct ObserveState {
  observers: [Option<SocketAddr>; OBS_CLIENTS_MAX],
  memos: [Option<ObsMemo>; OBS_REGISTRATIONS_MAX],
}

/// Why a registration was refused. The Observe option is cleared from
/// the response and the exchange degrades to a normal one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegisterError {
  /// Registration or observer table is full
  NoSlot,
  /// The resource already has an observer
  ResourceTaken,
}

impl ObserveState {
  /// The endpoint of the observer a memo references.
  pub(crate) fn observer_addr(&self, memo_ix: usize) -> Option<SocketAddr> {
    let memo = self.memos.get(memo_ix).copied().flatten()?;
    self.observers.get(memo.observer).copied().flatten()
  }

  pub(crate) fn memo(&self, memo_ix: usize) -> Option<&ObsMemo> {
    self.memos.get(memo_ix).and_then(|m| m.as_ref())
  }

  /// Find the registration for a (remote, token) pair.
  pub(crate) fn find_memo(&self, remote: SocketAddr, token: &[u8]) -> Option<usize> {
    let observer = self.find_observer(remote)?;
    (0..OBS_REGISTRATIONS_MAX).find(|&ix| match self.memos[ix] {
                                 | Some(m) => {
                                   m.observer == observer && m.token.as_bytes() == token
                                 },
                                 | None => false,
                               })
  }

  /// Find the registration for a resource. One observer per resource.
  pub(crate) fn find_memo_resource(&self, resource: &'static Resource) -> Option<usize> {
    (0..OBS_REGISTRATIONS_MAX).find(|&ix| match self.memos[ix] {
                                 | Some(m) => core::ptr::eq(m.resource, resource),
                                 | None => false,
                               })
  }

  /// Record a registration for (remote, token) on `resource`.
  ///
  /// An existing registration with the same remote and token is
  /// re-bound in place. Otherwise a free memo slot, a free (or
  /// matching) observer slot, and an unobserved resource are all
  /// required.
  pub(crate) fn register(&mut self,
                         remote: SocketAddr,
                         token: &Token,
                         resource: &'static Resource)
                         -> Result<(), RegisterError> {
    if let Some(ix) = self.find_memo(remote, token.as_bytes()) {
      // re-registration; rebind
      if let Some(memo) = self.memos[ix].as_mut() {
        memo.resource = resource;
      }
      return Ok(());
    }

    if self.find_memo_resource(resource).is_some() {
      return Err(RegisterError::ResourceTaken);
    }

    let memo_slot = (0..OBS_REGISTRATIONS_MAX).find(|&ix| self.memos[ix].is_none())
                                              .ok_or(RegisterError::NoSlot)?;

    let observer = match self.find_observer(remote) {
      | Some(ix) => ix,
      | None => {
        let free = (0..OBS_CLIENTS_MAX).find(|&ix| self.observers[ix].is_none())
                                       .ok_or(RegisterError::NoSlot)?;
        self.observers[free] = Some(remote);
        free
      },
    };

    self.memos[memo_slot] = Some(ObsMemo { observer,
                                           resource,
                                           token: *token });
    Ok(())
  }

  /// Remove the registration for (remote, token), if any.
  pub(crate) fn deregister(&mut self, remote: SocketAddr, token: &[u8]) {
    if let Some(ix) = self.find_memo(remote, token) {
      self.clear(ix);
    }
  }

  /// Clear a registration; frees its observer slot when this was the
  /// last registration referencing it.
  pub(crate) fn clear(&mut self, memo_ix: usize) {
    let Some(memo) = self.memos.get_mut(memo_ix).and_then(|m| m.take()) else {
      return;
    };

    let still_referenced = self.memos.iter()
                                     .flatten()
                                     .any(|m| m.observer == memo.observer);
    if !still_referenced {
      self.observers[memo.observer] = None;
    }
  }

  fn find_observer(&self, remote: SocketAddr) -> Option<usize> {
    (0..OBS_CLIENTS_MAX).find(|&ix| self.observers[ix] == Some(remote))
  }

  #[cfg(test)]
  pub(crate) fn observer_count(&self) -> usize {
    self.observers.iter().filter(|o| o.is_some()).count()
  }
}
