use std::sync::Arc;

use croak_msg::{code, BuildError, Code, ContentFormat, Packet, Type};
use no_std_net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tinyvec::ArrayVec;

use super::{Error, LoopEvent, Shared, What, When};
use crate::config::{Config, HDR_MAX};
use crate::net::{Addrd, Socket};
use crate::platform::Platform;
use crate::reqs::{Memo, MemoMsg, ReqState, RespHandler};
use crate::retry::RetryTimer;
use crate::server::{Listener, Resource};

/// Bytes reserved between a request header and its payload for the
/// options written at finish time, on top of the path length.
const REQ_OPTIONS_GAP: usize = 16;

/// Options gap for notifications: an Observe counter and a
/// Content-Format.
const OBS_OPTIONS_GAP: usize = 8;

/// Everything about an outgoing request that
/// [`Handle::req_init_opts`] lets you pick.
#[derive(Debug, Clone, Copy)]
pub struct SendOpts<'a> {
  /// The request code
  pub code: Code,
  /// The request path, with leading `/`
  pub path: &'a str,
  /// Confirmable or Non-confirmable
  pub ty: Type,
}

/// The user-facing side of the engine.
///
/// Cloneable and shareable across threads; every operation either
/// completes immediately under the engine lock or hands work to the
/// dispatch context.
pub struct Handle<P: Platform> {
  shared: Arc<Shared<P>>,
}

impl<P: Platform> Clone for Handle<P> {
  fn clone(&self) -> Self {
    Self { shared: self.shared.clone() }
  }
}

impl<P: Platform> core::fmt::Debug for Handle<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Handle").finish_non_exhaustive()
  }
}

impl<P: Platform> Handle<P> {
  pub(crate) fn new(shared: Arc<Shared<P>>) -> Self {
    Self { shared }
  }

  /// A copy of the engine's runtime configuration
  pub fn config(&self) -> Config {
    self.shared.config
  }

  /// The local endpoint the engine is listening on
  pub fn local_addr(&self) -> SocketAddr {
    self.shared.sock.local_addr()
  }

  /// Append a listener to the end of the routing order.
  ///
  /// Resources within the listener must be in ascending ASCII path
  /// order.
  pub fn register_listener(&self, listener: &'static Listener) -> Result<(), Error<P>> {
    self.shared.state.lock().unwrap().listeners.register(listener)
        .map_err(|()| When::Building.what(What::NoSlot))
  }

  /// Number of requests currently being tracked
  pub fn op_state(&self) -> usize {
    self.shared.state.lock().unwrap().reqs.open_count()
  }

  /// Start a Confirmable request: fresh message id, random token,
  /// header written into `buf`, payload window positioned past the
  /// options gap.
  ///
  /// Write the payload through [`Packet::payload_mut`], then seal
  /// with [`Packet::finish`] and hand the bytes to
  /// [`Handle::req_send`].
  pub fn req_init(&self, buf: &mut [u8], code: Code, path: &str) -> Result<Packet, Error<P>> {
    self.req_init_opts(buf, &SendOpts { code, path, ty: Type::Con })
  }

  /// [`Handle::req_init`] with the message type picked by the caller
  pub fn req_init_opts(&self, buf: &mut [u8], opts: &SendOpts) -> Result<Packet, Error<P>> {
    let token = self.shared.gen_token();
    let mid = self.shared.fresh_mid();

    let build = When::Building;
    let mut pkt =
      Packet::init(buf, opts.ty, token, opts.code, mid, opts.path.len() + REQ_OPTIONS_GAP)
        .map_err(|e| build.what(What::Build(e)))?;
    pkt.set_path(opts.path).map_err(|e| build.what(What::Build(e)))?;
    Ok(pkt)
  }

  /// Send a finished request PDU and track the exchange.
  ///
  /// A Confirmable PDU is copied into a retransmit-pool slot and
  /// retransmitted on the RFC 7252 schedule until answered or out of
  /// budget; a Non-confirmable one is given a fixed response
  /// lifetime. Either way `resp_handler` (if any) fires exactly once,
  /// on the dispatch context.
  pub fn req_send(&self,
                  pdu: &[u8],
                  remote: SocketAddr,
                  resp_handler: Option<RespHandler>)
                  -> Result<(), Error<P>> {
    self.send_inner(pdu, remote, resp_handler, false).map(|_| ())
  }

  /// [`Handle::req_send`], but parks the calling thread until the
  /// request reaches a terminal state, which is returned.
  ///
  /// Must not be called from the dispatch context (it would sleep the
  /// engine), and expects the dispatch loop to be running.
  pub fn req_send_blocking(&self,
                           pdu: &[u8],
                           remote: SocketAddr,
                           resp_handler: Option<RespHandler>)
                           -> Result<ReqState, Error<P>> {
    if *self.shared.dispatch.lock().unwrap() == Some(std::thread::current().id()) {
      log::debug!("can't send; would put the dispatch context to sleep");
      return Err(When::Sending.what(What::WouldBlockDispatch));
    }

    let ix = self.send_inner(pdu, remote, resp_handler, true)?;

    let mut st = self.shared.state.lock().unwrap();
    loop {
      match st.reqs.memo(ix).map(|m| m.state) {
        | Some(ReqState::Wait) => st = self.shared.done.wait(st).unwrap(),
        | Some(state) => {
          st.reqs.release(ix);
          return Ok(state);
        },
        // the slot vanished from under us; treat as expired
        | None => return Ok(ReqState::Timeout),
      }
    }
  }

  fn send_inner(&self,
                pdu: &[u8],
                remote: SocketAddr,
                resp_handler: Option<RespHandler>,
                sync: bool)
                -> Result<usize, Error<P>> {
    if pdu.len() < 4 {
      return Err(When::Sending.what(What::Build(BuildError::PduTooSmall)));
    }

    let ty = Type::from_byte1(pdu[0]).unwrap_or(Type::Reset);
    if !matches!(ty, Type::Con | Type::Non) {
      log::debug!("illegal msg type: {:?}", ty);
      return Err(When::Sending.what(What::IllegalType(ty)));
    }

    let now = self.shared.now()
                  .ok_or_else(|| When::Sending.what(What::ClockError))?;
    let config = self.shared.config;

    let ix = {
      let mut st = self.shared.state.lock().unwrap();

      let (msg, timer) = match ty {
        | Type::Con => {
          let slot = st.reqs.claim_buf(pdu).ok_or_else(|| {
                                             log::debug!("no space for PDU in resend bufs");
                                             When::Sending.what(What::NoSlot)
                                           })?;
          let mut rng = self.shared.rand.lock().unwrap();
          (MemoMsg::Con { slot, len: pdu.len() },
           RetryTimer::con(now,
                           config.ack_timeout,
                           config.random_factor_pct,
                           config.max_retransmit,
                           &mut *rng))
        },
        | _ => {
          let mut hdr = ArrayVec::new();
          let hdr_len = (4 + (pdu[0] & 0b1111) as usize).min(pdu.len()).min(HDR_MAX);
          hdr.extend_from_slice(&pdu[..hdr_len]);
          (MemoMsg::Non { hdr }, RetryTimer::non(now, config.non_timeout))
        },
      };

      let pool_slot = match &msg {
        | MemoMsg::Con { slot, .. } => Some(*slot),
        | _ => None,
      };

      match st.reqs.claim(Memo { state: ReqState::Wait,
                                 msg,
                                 remote,
                                 timer: Some(timer),
                                 handler: resp_handler,
                                 acked: false,
                                 sync }) {
        | Some(ix) => ix,
        | None => {
          log::debug!("dropping request; no space for response tracking");
          if let Some(slot) = pool_slot {
            st.reqs.release_buf(slot);
          }
          return Err(When::Sending.what(What::NoSlot));
        },
      }
    };

    // transmit and arm outside the lock
    if let Err(e) = nb::block!(self.shared.sock.send(Addrd(pdu, remote))) {
      log::debug!("sock send failed");
      self.shared.state.lock().unwrap().reqs.release(ix);
      return Err(When::Sending.what(What::SockError(e)));
    }

    // the dispatch context may be blocked in a timeout-less receive;
    // it has to observe the freshly armed timer
    if !self.shared.mailbox.try_put(LoopEvent::Intr) {
      log::debug!("can't wake up mailbox; no timeout for msg");
      self.shared.state.lock().unwrap().reqs.release(ix);
      return Err(When::Sending.what(What::MailboxFull));
    }
    self.wake();

    Ok(ix)
  }

  /// Interrupt the dispatch context's blocking receive with a
  /// zero-length datagram to its own port.
  fn wake(&self) {
    let mut local = self.shared.sock.local_addr();
    if local.ip().is_unspecified() {
      let lo = match local.ip() {
        | IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        | IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
      };
      local.set_ip(lo);
    }

    if nb::block!(self.shared.sock.insecure_send(Addrd(&[], local))).is_err() {
      log::debug!("wake-up datagram failed");
    }
  }

  /// Start a notification PDU for a resource's observer: the
  /// registered token, a fresh message id, code 2.05, and the current
  /// Observe counter. Non-confirmable by default.
  ///
  /// Fails with `NoObserver` when nobody observes the resource.
  pub fn obs_init(&self, buf: &mut [u8], resource: &'static Resource) -> Result<Packet, Error<P>> {
    self.obs_init_opts(buf, resource, Type::Non)
  }

  /// [`Handle::obs_init`] with the message type picked by the caller.
  /// Confirmable notifications gain retransmission and liveness
  /// tracking: a Reset from the observer deregisters it.
  pub fn obs_init_opts(&self,
                       buf: &mut [u8],
                       resource: &'static Resource,
                       ty: Type)
                       -> Result<Packet, Error<P>> {
    let token = {
      let st = self.shared.state.lock().unwrap();
      st.observe.find_memo_resource(resource)
        .and_then(|ix| st.observe.memo(ix))
        .map(|memo| memo.token)
        .ok_or_else(|| When::Building.what(What::NoObserver))?
    };

    let mid = self.shared.fresh_mid();
    let mut pkt = Packet::init(buf, ty, token, code::CONTENT, mid, OBS_OPTIONS_GAP)
      .map_err(|e| When::Building.what(What::Build(e)))?;
    pkt.observe = Some(self.shared.obs_counter());
    Ok(pkt)
  }

  /// Send a finished notification PDU to the resource's observer.
  ///
  /// Non-confirmable notifications go straight out; Confirmable ones
  /// are funneled through [`Handle::req_send`] for retransmission and
  /// ACK/Reset tracking.
  pub fn obs_send(&self, pdu: &[u8], resource: &'static Resource) -> Result<(), Error<P>> {
    if pdu.len() < 4 {
      return Err(When::Sending.what(What::Build(BuildError::PduTooSmall)));
    }

    let remote = {
      let st = self.shared.state.lock().unwrap();
      st.observe.find_memo_resource(resource)
        .and_then(|ix| st.observe.observer_addr(ix))
        .ok_or_else(|| When::Sending.what(What::NoObserver))?
    };

    match Type::from_byte1(pdu[0]).unwrap_or(Type::Reset) {
      | Type::Non => nb::block!(self.shared.sock.send(Addrd(pdu, remote)))
        .map_err(|e| When::Sending.what(What::SockError(e))),
      | Type::Con => self.req_send(pdu, remote, None),
      | ty => {
        log::debug!("unexpected obs msg type: {:?}", ty);
        Err(When::Sending.what(What::IllegalType(ty)))
      },
    }
  }

  /// Write the link-format listing of every registered resource
  /// (`</a>,</b>`) into `buf`, returning its length. Only
  /// [`ContentFormat::LINK_FORMAT`] is supported.
  pub fn get_resource_list(&self,
                          buf: &mut [u8],
                          format: ContentFormat)
                          -> Result<usize, Error<P>> {
    if format != ContentFormat::LINK_FORMAT {
      return Err(When::Building.what(What::UnsupportedFormat));
    }

    Ok(self.shared.state.lock().unwrap().listeners.resource_list(buf))
  }
}
