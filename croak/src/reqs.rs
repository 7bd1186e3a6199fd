use croak_msg::{Id, Packet};
use no_std_net::SocketAddr;
use tinyvec::ArrayVec;

use crate::config::{HDR_MAX, PDU_BUF_SIZE, REQ_WAITING_MAX, RESEND_BUFS_MAX};
use crate::retry::RetryTimer;
use crate::time::Clock;

/// Where a tracked request is in its lifecycle.
///
/// An untracked slot has no state at all; a request the engine knows
/// about is `Wait`ing, and ends up `Resp`onded or `Timeout` exactly
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqState {
  /// Sent; no response yet
  Wait,
  /// A response arrived and was (or is being) delivered
  Resp,
  /// The retransmission budget or response lifetime lapsed
  Timeout,
}

/// Handler invoked with the outcome of a request sent with
/// `req_send`: the terminal [`ReqState`], the response packet (or, on
/// timeout, the echo of the request header), the PDU bytes the
/// packet's payload window points into, and the remote that answered
/// (`None` on timeout).
///
/// Runs on the dispatch context and must not block.
pub type RespHandler = fn(ReqState, &Packet, &[u8], Option<SocketAddr>);

/// What the engine retains of the request bytes.
///
/// A Confirmable request keeps its entire PDU in a retransmit-pool
/// slot; a Non-confirmable request only needs its header retained for
/// response matching.
#[derive(Debug, Clone)]
pub(crate) enum MemoMsg {
  /// Full PDU, owned via a pool slot
  Con {
    /// Index of the owned [`ResendPool`] slot
    slot: usize,
    /// Length of the PDU within the slot
    len: usize,
  },
  /// Header and token only
  Non {
    /// The leading header bytes of the request
    hdr: ArrayVec<[u8; HDR_MAX]>,
  },
}

/// One outstanding request.
#[derive(Debug, Clone)]
pub(crate) struct Memo<C: Clock> {
  pub(crate) state: ReqState,
  pub(crate) msg: MemoMsg,
  pub(crate) remote: SocketAddr,
  /// The armed deadline; `None` once retransmission is cancelled
  pub(crate) timer: Option<RetryTimer<C>>,
  pub(crate) handler: Option<RespHandler>,
  /// An empty ACK arrived; a separate response may still follow
  pub(crate) acked: bool,
  /// A blocked sender waits on this memo; the dispatch context leaves
  /// the terminal state in place for it instead of releasing
  pub(crate) sync: bool,
}

/// The table of outstanding requests plus the retransmit pool.
#[derive(Debug)]
pub(crate) struct ReqTable<C: Clock> {
  memos: [Option<Memo<C>>; REQ_WAITING_MAX],
  pool: ResendPool,
}

impl<C: Clock> ReqTable<C> {
  pub(crate) fn new() -> Self {
    Self { memos: core::array::from_fn(|_| None),
           pool: ResendPool::new() }
  }

  /// Claim the first free slot for `memo`. `None` when the table is
  /// full.
  pub(crate) fn claim(&mut self, memo: Memo<C>) -> Option<usize> {
    let slot = self.memos.iter().position(|m| m.is_none())?;
    self.memos[slot] = Some(memo);
    Some(slot)
  }

  /// Copy a Confirmable PDU into a free retransmit-pool slot.
  pub(crate) fn claim_buf(&mut self, pdu: &[u8]) -> Option<usize> {
    self.pool.claim(pdu)
  }

  /// Give a pool slot back without touching any memo (send-failure
  /// path, before the memo was stored).
  pub(crate) fn release_buf(&mut self, slot: usize) {
    self.pool.release(slot);
  }

  pub(crate) fn memo(&self, ix: usize) -> Option<&Memo<C>> {
    self.memos.get(ix).and_then(|m| m.as_ref())
  }

  pub(crate) fn memo_mut(&mut self, ix: usize) -> Option<&mut Memo<C>> {
    self.memos.get_mut(ix).and_then(|m| m.as_mut())
  }

  /// Free a memo and, for Confirmable requests, its pool slot.
  pub(crate) fn release(&mut self, ix: usize) {
    if let Some(memo) = self.memos.get_mut(ix).and_then(|m| m.take()) {
      if let MemoMsg::Con { slot, .. } = memo.msg {
        self.pool.release(slot);
      }
    }
  }

  /// Number of tracked requests
  pub(crate) fn open_count(&self) -> usize {
    self.memos.iter().filter(|m| m.is_some()).count()
  }

  /// The bytes retained for a memo: the full PDU for Confirmable
  /// requests, the header for Non-confirmable ones.
  pub(crate) fn stored(&self, ix: usize) -> Option<&[u8]> {
    self.memo(ix).map(|memo| match &memo.msg {
                   | MemoMsg::Con { slot, len } => self.pool.get(*slot, *len),
                   | MemoMsg::Non { hdr } => &hdr[..],
                 })
  }

  /// Match an incoming empty message to the request it confirms, by
  /// message ID.
  pub(crate) fn find_mid(&self, id: Id) -> Option<usize> {
    (0..REQ_WAITING_MAX).find(|&ix| match self.stored(ix) {
                           | Some(h) if h.len() >= 4 => Id::from_be_bytes([h[2], h[3]]) == id,
                           | _ => false,
                         })
  }

  /// Match an incoming response to the request it answers, by token.
  pub(crate) fn find_token(&self, token: &[u8]) -> Option<usize> {
    (0..REQ_WAITING_MAX).find(|&ix| match self.stored(ix) {
                           | Some(h) if h.len() >= 4 => hdr_token(h) == token,
                           | _ => false,
                         })
  }
}

/// The token bytes of a serialized request header.
pub(crate) fn hdr_token(hdr: &[u8]) -> &[u8] {
  let tkl = (hdr[0] & 0b1111) as usize;
  hdr.get(4..4 + tkl).unwrap_or(&[])
}

/// Fixed pool of retransmit buffers.
///
/// A slot is free iff its first byte is zero; a stored PDU always
/// begins with a non-zero byte (the version bits), so claiming a slot
/// and releasing it are both one-byte operations.
#[derive(Debug)]
pub(crate) struct ResendPool {
  bufs: [[u8; PDU_BUF_SIZE]; RESEND_BUFS_MAX],
}

impl ResendPool {
  fn new() -> Self {
    Self { bufs: [[0; PDU_BUF_SIZE]; RESEND_BUFS_MAX] }
  }

  fn claim(&mut self, pdu: &[u8]) -> Option<usize> {
    if pdu.is_empty() || pdu[0] == 0 || pdu.len() > PDU_BUF_SIZE {
      return None;
    }

    let slot = self.bufs.iter().position(|b| b[0] == 0)?;
    self.bufs[slot][..pdu.len()].copy_from_slice(pdu);
    Some(slot)
  }

  fn release(&mut self, slot: usize) {
    self.bufs[slot][0] = 0;
  }

  fn get(&self, slot: usize, len: usize) -> &[u8] {
    &self.bufs[slot][..len]
  }

  #[cfg(test)]
  pub(crate) fn is_free(&self, slot: usize) -> bool {
    self.bufs[slot][0] == 0
  }
}
