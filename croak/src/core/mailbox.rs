use std::sync::Mutex;

use tinyvec::ArrayVec;

use crate::config::MSG_QUEUE_SIZE;

/// Events the dispatch context consumes from its mailbox, ahead of
/// anything the transport has to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum LoopEvent {
  /// The armed timer of the request in this table slot has fired
  Timeout(usize),
  /// No payload; only wakes the loop out of a blocking receive so a
  /// freshly armed timer is taken into account
  #[default]
  Intr,
}

/// Fixed-capacity FIFO mailbox. Like the engine's tables it never
/// grows: depositing into a full mailbox fails and the caller deals
/// with it.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
  q: Mutex<ArrayVec<[LoopEvent; MSG_QUEUE_SIZE]>>,
}

impl Mailbox {
  /// Deposit an event. `false` when the mailbox is full.
  pub(crate) fn try_put(&self, ev: LoopEvent) -> bool {
    let mut q = self.q.lock().unwrap();

    if q.len() == MSG_QUEUE_SIZE {
      return false;
    }

    q.push(ev);
    true
  }

  /// Take the oldest event, if any.
  pub(crate) fn pop(&self) -> Option<LoopEvent> {
    let mut q = self.q.lock().unwrap();

    if q.is_empty() {
      None
    } else {
      Some(q.remove(0))
    }
  }
}
