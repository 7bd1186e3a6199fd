use core::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use croak_msg::{build_hdr, code, CodeKind, ContentFormat, Id, MethodFlags, Packet, Token, Type};
use embedded_time::{Clock as _, Instant};
use no_std_net::SocketAddr;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tinyvec::ArrayVec;

mod error;
mod handle;
mod mailbox;

pub use error::{Error, What, When};
pub use handle::{Handle, SendOpts};
pub(crate) use mailbox::{LoopEvent, Mailbox};

use crate::config::{Config, HDR_MAX, PDU_BUF_SIZE, REQ_WAITING_MAX};
use crate::net::{Addrd, Socket};
use crate::observe::ObserveState;
use crate::platform::Platform;
use crate::reqs::{self, MemoMsg, ReqState, ReqTable};
use crate::retry::RetryTimer;
use crate::server::{self, Listeners, Lookup};
use crate::time::{micros_since_epoch, Timeout};

/// Every mutable table of the engine, guarded by the one lock in
/// [`Shared`]: mutation happens on the dispatch context, or under the
/// lock from a user context claiming a request slot.
pub(crate) struct State<P: Platform> {
  pub(crate) listeners: Listeners,
  pub(crate) reqs: ReqTable<P::Clock>,
  pub(crate) observe: ObserveState,
}

/// Engine state shared between the dispatch context and every
/// [`Handle`].
pub(crate) struct Shared<P: Platform> {
  pub(crate) state: Mutex<State<P>>,
  pub(crate) mailbox: Mailbox,
  pub(crate) sock: P::Socket,
  pub(crate) clock: P::Clock,
  /// Monotonic message-id counter, randomly seeded at construction
  pub(crate) next_mid: AtomicU16,
  pub(crate) rand: Mutex<ChaCha8Rng>,
  /// Signalled when a tracked request reaches a terminal state, for
  /// blocking senders
  pub(crate) done: Condvar,
  pub(crate) config: Config,
  /// Identity of the thread running the dispatch loop, once started
  pub(crate) dispatch: Mutex<Option<std::thread::ThreadId>>,
}

impl<P: Platform> Shared<P> {
  pub(crate) fn now(&self) -> Option<Instant<P::Clock>> {
    self.clock.try_now().ok()
  }

  /// The 24-bit Observe counter for a notification sent right now:
  /// the monotonic microsecond clock, slowed down by the configured
  /// tick exponent. Monotone between notifications at sane send rates.
  pub(crate) fn obs_counter(&self) -> u32 {
    let micros = self.now().map(micros_since_epoch).unwrap_or(0);
    ((micros >> self.config.obs_tick_exponent) & 0xFF_FFFF) as u32
  }

  /// Allocate a fresh message id
  pub(crate) fn fresh_mid(&self) -> Id {
    Id(self.next_mid.fetch_add(1, Ordering::Relaxed))
  }

  /// Generate a random token of the configured length
  pub(crate) fn gen_token(&self) -> Token {
    let mut bytes = [0u8; 8];
    self.rand.lock().unwrap().fill(&mut bytes[..]);
    Token::from_slice(&bytes[..self.config.token_len.min(8) as usize])
  }
}

/// The dispatch context of the engine.
///
/// Owns the receive buffer and the event loop that serializes all
/// protocol work: one iteration of [`Core::step`] services the
/// mailbox (retransmission timers, wake-ups), then receives and
/// classifies one datagram. [`Core::run`] loops forever; construct
/// with [`Core::new`] and hand the [`Handle`] to the rest of the
/// application.
pub struct Core<P: Platform> {
  shared: Arc<Shared<P>>,
  buf: [u8; PDU_BUF_SIZE],
}

impl<P: Platform> core::fmt::Debug for Core<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Core").finish_non_exhaustive()
  }
}

impl<P: Platform> Core<P> {
  /// Create an engine from a clock and a bound socket.
  ///
  /// The message-id counter is seeded from the clock; bring the
  /// socket already bound to the CoAP port you want
  /// ([`crate::config::Config::port`] by convention).
  pub fn new(config: Config, clock: P::Clock, sock: P::Socket) -> (Self, Handle<P>) {
    let seed = clock.try_now().ok().map(micros_since_epoch).unwrap_or(0);
    let mut rand = ChaCha8Rng::seed_from_u64(seed);

    let shared = Arc::new(Shared { state: Mutex::new(State { listeners: Listeners::default(),
                                                             reqs: ReqTable::new(),
                                                             observe: ObserveState::default() }),
                                   mailbox: Mailbox::default(),
                                   sock,
                                   clock,
                                   next_mid: AtomicU16::new(rand.gen()),
                                   rand: Mutex::new(rand),
                                   done: Condvar::new(),
                                   config,
                                   dispatch: Mutex::new(None) });

    (Self { shared: shared.clone(),
            buf: [0; PDU_BUF_SIZE] },
     Handle::new(shared))
  }

  /// Run the dispatch loop forever on the current thread.
  pub fn run(&mut self) -> ! {
    *self.shared.dispatch.lock().unwrap() = Some(std::thread::current().id());

    loop {
      if let Err(e) = self.step() {
        log::warn!("dispatch error: {:?}", e);
      }
    }
  }

  /// One iteration of the dispatch loop: post expired timers to the
  /// mailbox, drain it, then receive one datagram, with a short
  /// timeout while any request is outstanding (so timers stay
  /// serviced), blocking indefinitely otherwise.
  pub fn step(&mut self) -> Result<(), Error<P>> {
    self.scan_timers();

    while let Some(ev) = self.shared.mailbox.pop() {
      match ev {
        | LoopEvent::Timeout(ix) => self.timer_fired(ix),
        | LoopEvent::Intr => (),
      }
    }

    let pending = self.shared.state.lock().unwrap().reqs.open_count();
    let timeout = if pending > 0 {
      Timeout::Millis(self.shared.config.recv_timeout.0)
    } else {
      Timeout::Never
    };

    match self.shared.sock.recv(&mut self.buf, timeout) {
      // zero-length datagrams are wake-ups, ours or a peer's probe
      | Ok(Addrd(0, _)) => Ok(()),
      | Ok(Addrd(n, addr)) => {
        self.ingress(n, addr);
        Ok(())
      },
      | Err(nb::Error::WouldBlock) => Ok(()),
      | Err(nb::Error::Other(e)) => Err(When::Polling.what(What::SockError(e))),
    }
  }

  /// Deposit a `Timeout` event for every armed timer that has
  /// expired. Duplicates are harmless: `timer_fired` re-checks.
  fn scan_timers(&self) {
    let Some(now) = self.shared.now() else {
      return;
    };

    let st = self.shared.state.lock().unwrap();
    for ix in 0..REQ_WAITING_MAX {
      let expired = st.reqs.memo(ix)
                     .filter(|m| m.state == ReqState::Wait)
                     .and_then(|m| m.timer.as_ref())
                     .map(|t| t.expired(now))
                     .unwrap_or(false);

      if expired && !self.shared.mailbox.try_put(LoopEvent::Timeout(ix)) {
        log::debug!("mailbox full; timer for slot {} deferred", ix);
      }
    }
  }

  /// A request's timer fired: retransmit if budget remains, expire
  /// otherwise.
  fn timer_fired(&self, ix: usize) {
    let Some(now) = self.shared.now() else {
      return;
    };

    let mut st = self.shared.state.lock().unwrap();

    let (expired, exhausted, remote) = match st.reqs.memo(ix) {
      | Some(m) if m.state == ReqState::Wait => match m.timer.as_ref() {
        | Some(t) => (t.expired(now), t.exhausted() || m.acked, m.remote),
        | None => return,
      },
      | _ => return,
    };

    if !expired {
      // stale event; the timer was re-armed since it was posted
      return;
    }

    if !exhausted {
      {
        let mut rng = self.shared.rand.lock().unwrap();
        if let Some(t) = st.reqs.memo_mut(ix).and_then(|m| m.timer.as_mut()) {
          t.backoff(now, &mut *rng);
        }
      }

      let resent = st.reqs.stored(ix)
                    .map(|pdu| nb::block!(self.shared.sock.send(Addrd(pdu, remote))).is_ok())
                    .unwrap_or(false);
      if resent {
        return;
      }

      log::debug!("sock resend failed; expiring request");
    }

    self.expire_request(st, ix, remote);
  }

  /// The request is out of retransmissions (or non-confirmable and
  /// out of time): fire its callback with `Timeout`, drop any Observe
  /// registration tied to its token, and release the slot.
  fn expire_request(&self,
                    mut st: std::sync::MutexGuard<'_, State<P>>,
                    ix: usize,
                    remote: SocketAddr) {
    let hdr = match st.reqs.stored(ix) {
      | Some(stored) => copy_hdr(stored),
      | None => return,
    };

    let (handler, sync, is_con) = match st.reqs.memo_mut(ix) {
      | Some(m) => {
        m.state = ReqState::Timeout;
        m.timer = None;
        (m.handler, m.sync, matches!(m.msg, MemoMsg::Con { .. }))
      },
      | None => return,
    };

    if is_con {
      let token: ArrayVec<[u8; 8]> = reqs::hdr_token(&hdr).iter().copied().collect();
      if let Some(oix) = st.observe.find_memo(remote, &token) {
        log::debug!("deregistering observer; notification never acked");
        st.observe.clear(oix);
      }
    }

    if sync {
      self.shared.done.notify_all();
    } else {
      st.reqs.release(ix);
    }
    drop(st);

    if let Some(handler) = handler {
      // the callback sees the request's own header echoed back, and
      // no remote: nobody answered
      if let Ok(req) = Packet::parse(&hdr) {
        handler(ReqState::Timeout, &req, &hdr, None);
      }
    }
  }

  /// Classify one received datagram, per its code class and type.
  fn ingress(&mut self, n: usize, addr: SocketAddr) {
    let mut pkt = match Packet::parse(&self.buf[..n]) {
      | Ok(pkt) => pkt,
      | Err(e) => {
        // dropped silently; a response here would be an amplifier
        log::debug!("parse failure: {:?}", e);
        return;
      },
    };

    log::trace!("recvd {}b <- {}: {:?} {:?}", n, addr, pkt.ty, pkt.code);

    match pkt.code.kind() {
      | CodeKind::Empty => self.empty_recvd(&pkt, addr),
      | CodeKind::Request if pkt.ty == Type::Con || pkt.ty == Type::Non => {
        if let Some(len) = self.handle_req(&mut pkt, addr) {
          if len > 0 {
            let _ = nb::block!(self.shared.sock.send(Addrd(&self.buf[..len], addr)));
          }
        }
      },
      | CodeKind::Request => log::debug!("illegal request type: {:?}", pkt.ty),
      | CodeKind::Response => self.resp_recvd(&pkt, addr),
    }
  }

  /// An empty (code 0.00) message pairs with a Confirmable request of
  /// ours by message id: it cancels retransmission. For an Observe
  /// notification the exchange is complete (and a Reset deregisters
  /// the observer); for a plain request a separate response is still
  /// expected, so the memo stays alive on the non-confirmable
  /// lifetime.
  fn empty_recvd(&mut self, pkt: &Packet, addr: SocketAddr) {
    let mut st = self.shared.state.lock().unwrap();

    let Some(ix) = st.reqs.find_mid(pkt.id) else {
      log::debug!("can't match empty message to request, id {}", pkt.id.0);
      return;
    };

    let is_con_memo = matches!(st.reqs.memo(ix).map(|m| &m.msg), Some(MemoMsg::Con { .. }));
    let waiting = st.reqs.memo(ix).map(|m| m.state == ReqState::Wait).unwrap_or(false);
    if !is_con_memo || !waiting || !(pkt.ty == Type::Ack || pkt.ty == Type::Reset) {
      return;
    }

    let token: ArrayVec<[u8; 8]> = st.reqs.stored(ix)
                                    .map(|h| reqs::hdr_token(h).iter().copied().collect())
                                    .unwrap_or_default();

    if let Some(oix) = st.observe.find_memo(addr, &token) {
      // an acked (or reset) Observe notification; nothing further
      if let Some(m) = st.reqs.memo_mut(ix) {
        m.timer = None;
      }
      if pkt.ty == Type::Reset {
        log::debug!("deregistering observer on reset");
        st.observe.clear(oix);
      }
      st.reqs.release(ix);
    } else {
      // empty ack for a plain request: stop retransmitting and wait
      // out the separate response on the non-confirmable lifetime
      let Some(now) = self.shared.now() else {
        return;
      };
      if let Some(m) = st.reqs.memo_mut(ix) {
        m.acked = true;
        m.timer = Some(RetryTimer::non(now, self.shared.config.non_timeout));
      }
      log::debug!("empty ack; awaiting separate response");
    }
  }

  /// A response (class 2/4/5) pairs with a request of ours by token.
  fn resp_recvd(&mut self, pkt: &Packet, addr: SocketAddr) {
    if !matches!(pkt.code.class, 2 | 4 | 5) {
      log::debug!("illegal code class: {}", pkt.code.class);
      return;
    }

    let mut st = self.shared.state.lock().unwrap();

    let Some(ix) = st.reqs.find_token(pkt.token.as_bytes()) else {
      log::debug!("msg not found for id {}", pkt.id.0);
      return;
    };

    if st.reqs.memo(ix).map(|m| m.state) != Some(ReqState::Wait) {
      return;
    }

    match pkt.ty {
      | Type::Non | Type::Ack => (),
      | Type::Con => {
        // a separate Confirmable response; ack it so the peer stops
        // retransmitting, then deliver as usual
        log::debug!("acking separate response, id {}", pkt.id.0);
        let mut ack = [0u8; 4];
        if build_hdr(&mut ack, Type::Ack, &Token::default(), code::EMPTY, pkt.id).is_ok() {
          let _ = nb::block!(self.shared.sock.send(Addrd(&ack[..], addr)));
        }
      },
      | Type::Reset => {
        log::debug!("illegal response type: {:?}", pkt.ty);
        return;
      },
    }

    let (handler, sync) = match st.reqs.memo_mut(ix) {
      | Some(m) => {
        m.timer = None;
        m.state = ReqState::Resp;
        (m.handler, m.sync)
      },
      | None => return,
    };

    if sync {
      self.shared.done.notify_all();
    } else {
      st.reqs.release(ix);
    }
    drop(st);

    if let Some(handler) = handler {
      handler(ReqState::Resp, pkt, &self.buf, Some(addr));
    }
  }

  /// Route a request to its resource handler and produce the response
  /// PDU in the receive buffer. `None` means no response at all.
  fn handle_req(&mut self, pkt: &mut Packet, addr: SocketAddr) -> Option<usize> {
    let Some(flag) = pkt.code.method_flag() else {
      log::debug!("unsupported request method: {:?}", pkt.code);
      return None;
    };

    // the engine-owned discovery resource is consulted first and
    // cannot be shadowed by a listener
    if pkt.path() == server::WELL_KNOWN_CORE.as_bytes() {
      return self.well_known_core(pkt, flag);
    }

    let mut st = self.shared.state.lock().unwrap();

    let resource = match st.listeners.find(pkt.path(), flag) {
      | Lookup::NoPath => {
        drop(st);
        return server::response(pkt, &mut self.buf, code::NOT_FOUND).ok();
      },
      | Lookup::WrongMethod => {
        drop(st);
        return server::response(pkt, &mut self.buf, code::METHOD_NOT_ALLOWED).ok();
      },
      | Lookup::Found(resource, _) => resource,
    };

    match pkt.observe() {
      | Some(0) => match st.observe.register(addr, &pkt.token, resource) {
        | Ok(()) => {
          log::debug!("registered observer for {}", resource.path);
          pkt.observe = Some(self.shared.obs_counter());
        },
        | Err(e) => {
          log::debug!("can't register observe memo: {:?}", e);
          pkt.clear_observe();
        },
      },
      | Some(1) => {
        log::debug!("deregistering observer for {}", resource.path);
        st.observe.deregister(addr, pkt.token.as_bytes());
        pkt.clear_observe();
      },
      | Some(v) => {
        // bogus request; don't respond
        log::debug!("observe value unexpected: {}", v);
        return None;
      },
      | None => (),
    }

    drop(st);

    let handler = resource.handler;
    match handler(pkt, &mut self.buf) {
      | Ok(len) => Some(len),
      | Err(_) => server::response(pkt, &mut self.buf, code::INTERNAL_SERVER_ERROR).ok(),
    }
  }

  /// `/.well-known/core`: list every registered resource in link
  /// format.
  fn well_known_core(&mut self, pkt: &mut Packet, flag: MethodFlags) -> Option<usize> {
    if flag != MethodFlags::GET {
      return server::response(pkt, &mut self.buf, code::METHOD_NOT_ALLOWED).ok();
    }

    pkt.clear_observe();
    pkt.init_response(&mut self.buf, code::CONTENT).ok()?;

    let st = self.shared.state.lock().unwrap();
    let n = st.listeners.resource_list(pkt.payload_mut(&mut self.buf));
    drop(st);

    pkt.finish(&mut self.buf, n, Some(ContentFormat::LINK_FORMAT)).ok()
  }
}

/// The header-plus-token prefix of a stored request PDU.
fn copy_hdr(stored: &[u8]) -> ArrayVec<[u8; HDR_MAX]> {
  let hdr_len = (4 + (stored[0] & 0b1111) as usize).min(stored.len()).min(HDR_MAX);
  let mut out = ArrayVec::new();
  out.extend_from_slice(&stored[..hdr_len]);
  out
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;
  use std::sync::Mutex as StdMutex;

  use croak_msg::opt;

  use super::*;
  use crate::server::{HandlerResult, Listener, Resource};
  use crate::test::{dummy_addr, dummy_addr_2, ClockMock, SockMock, Test};

  fn setup() -> (Core<Test>, Handle<Test>, ClockMock, SockMock) {
    let clock = ClockMock::new();
    clock.set(1_000_000);
    let sock = SockMock::new();
    let (core, handle) = Core::<Test>::new(Config::default(), clock.clone(), sock.clone());
    (core, handle, clock, sock)
  }

  fn ping_handler(pkt: &mut Packet, buf: &mut [u8]) -> HandlerResult {
    pkt.init_response(buf, code::CONTENT)?;
    pkt.payload_mut(buf)[..4].copy_from_slice(b"pong");
    Ok(pkt.finish(buf, 4, Some(ContentFormat::TEXT))?)
  }

  static PING_RESOURCES: [Resource; 1] =
    [Resource::new("/ping", MethodFlags::GET, ping_handler)];
  static PING_LISTENER: Listener = Listener::new(&PING_RESOURCES);

  fn temp_handler(pkt: &mut Packet, buf: &mut [u8]) -> HandlerResult {
    pkt.init_response(buf, code::CONTENT)?;
    pkt.payload_mut(buf)[..2].copy_from_slice(b"22");
    Ok(pkt.finish(buf, 2, Some(ContentFormat::TEXT))?)
  }

  static TEMP_RESOURCES: [Resource; 1] = [Resource::new("/t", MethodFlags::GET, temp_handler)];
  static TEMP_LISTENER: Listener = Listener::new(&TEMP_RESOURCES);

  /// Build a raw CON request the way a remote client would
  fn request(req_code: croak_msg::Code,
             id: u16,
             token: &[u8],
             path: &str,
             observe: Option<u8>)
             -> Vec<u8> {
    let mut buf = [0u8; 128];
    let token = Token::from_slice(token);
    let mut pos = build_hdr(&mut buf, Type::Con, &token, req_code, Id(id)).unwrap();
    let mut last = 0u16;

    if let Some(v) = observe {
      let val = opt::observe_value(v as u32);
      pos += opt::put_option(&mut buf[pos..], last, opt::OBSERVE, &val).unwrap();
      last = opt::OBSERVE;
    }

    pos += opt::put_option_uri(&mut buf[pos..], last, path.as_bytes(), opt::URI_PATH).unwrap();
    buf[..pos].to_vec()
  }

  #[test]
  fn server_responds_to_request() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&PING_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::GET, 0x1234, &[0xAB], "/ping", None), dummy_addr()));
    core.step().unwrap();

    let resp = sock.sent(0).unwrap();
    assert_eq!(resp.addr(), dummy_addr());

    let pkt = Packet::parse(resp.data()).unwrap();
    assert_eq!(pkt.ty, Type::Ack);
    assert_eq!(pkt.id, Id(0x1234));
    assert_eq!(pkt.token.as_bytes(), &[0xAB]);
    assert_eq!(pkt.code, code::CONTENT);
    assert_eq!(pkt.payload(resp.data()), b"pong");
  }

  #[test]
  fn unknown_path_gets_not_found() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&PING_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::GET, 0x0777, &[0x01], "/nope", None), dummy_addr()));
    core.step().unwrap();

    let pkt = Packet::parse(sock.sent(0).unwrap().data()).unwrap();
    assert_eq!(pkt.code, code::NOT_FOUND);
    assert_eq!(pkt.id, Id(0x0777));
    assert_eq!(pkt.token.as_bytes(), &[0x01]);
  }

  #[test]
  fn wrong_method_gets_4_05() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&PING_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::PUT, 0x0778, &[0x02], "/ping", None), dummy_addr()));
    core.step().unwrap();

    let pkt = Packet::parse(sock.sent(0).unwrap().data()).unwrap();
    assert_eq!(pkt.code, code::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn well_known_core_lists_resources() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&PING_LISTENER).unwrap();
    handle.register_listener(&TEMP_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::GET, 1, &[0x03], "/.well-known/core", None),
                       dummy_addr()));
    core.step().unwrap();

    let resp = sock.sent(0).unwrap();
    let pkt = Packet::parse(resp.data()).unwrap();
    assert_eq!(pkt.code, code::CONTENT);
    assert_eq!(pkt.content_format, Some(ContentFormat::LINK_FORMAT));
    assert_eq!(pkt.payload(resp.data()), b"</ping>,</t>");
  }

  #[test]
  fn observe_register_notify_deregister() {
    let (mut core, handle, clock, sock) = setup();
    handle.register_listener(&TEMP_LISTENER).unwrap();

    clock.set(32_000_000);
    sock.push_rx(Addrd(request(code::GET, 1, &[0xF0, 0x0D], "/t", Some(0)), dummy_addr()));
    core.step().unwrap();

    // registration response carries the initial counter
    let resp = sock.sent(0).unwrap();
    let pkt = Packet::parse(resp.data()).unwrap();
    assert_eq!(pkt.code, code::CONTENT);
    assert_eq!(pkt.observe(), Some(1_000_000));

    // notifications reuse the registered token
    clock.set(33_000_000);
    let mut buf = [0u8; 128];
    let mut note = handle.obs_init(&mut buf, &TEMP_RESOURCES[0]).unwrap();
    assert_eq!(note.token.as_bytes(), &[0xF0, 0x0D]);
    let counter = note.observe().unwrap();
    assert!(counter >= 1_000_000);

    note.payload_mut(&mut buf)[..2].copy_from_slice(b"23");
    let n = note.finish(&mut buf, 2, Some(ContentFormat::TEXT)).unwrap();
    handle.obs_send(&buf[..n], &TEMP_RESOURCES[0]).unwrap();

    let sent = sock.sent(1).unwrap();
    assert_eq!(sent.addr(), dummy_addr());
    let sent_pkt = Packet::parse(sent.data()).unwrap();
    assert_eq!(sent_pkt.ty, Type::Non);
    assert_eq!(sent_pkt.token.as_bytes(), &[0xF0, 0x0D]);
    assert_eq!(sent_pkt.observe(), Some(counter));

    // the counter never goes backwards
    clock.set(40_000_000);
    let mut buf2 = [0u8; 128];
    assert!(handle.obs_init(&mut buf2, &TEMP_RESOURCES[0]).unwrap().observe().unwrap()
            >= counter);

    // deregistration clears the option and forgets the observer
    sock.push_rx(Addrd(request(code::GET, 2, &[0xF0, 0x0D], "/t", Some(1)), dummy_addr()));
    core.step().unwrap();

    let dereg = sock.sent(2).unwrap();
    assert!(!Packet::parse(dereg.data()).unwrap().has_observe());

    let mut buf3 = [0u8; 128];
    assert!(matches!(handle.obs_init(&mut buf3, &TEMP_RESOURCES[0]),
                     Err(Error { what: What::NoObserver, .. })));
  }

  #[test]
  fn second_observer_for_resource_degrades_to_one_shot() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&TEMP_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::GET, 1, &[0x01], "/t", Some(0)), dummy_addr()));
    core.step().unwrap();
    assert!(Packet::parse(sock.sent(0).unwrap().data()).unwrap().has_observe());

    sock.push_rx(Addrd(request(code::GET, 2, &[0x02], "/t", Some(0)), dummy_addr_2()));
    core.step().unwrap();

    // refused registration: normal response without the option
    let resp = Packet::parse(sock.sent(1).unwrap().data()).unwrap();
    assert_eq!(resp.code, code::CONTENT);
    assert!(!resp.has_observe());
  }

  static TIMEOUT_CALLS: AtomicUsize = AtomicUsize::new(0);

  fn timeout_cb(state: ReqState, req: &Packet, _buf: &[u8], remote: Option<SocketAddr>) {
    assert_eq!(state, ReqState::Timeout);
    assert!(remote.is_none());
    assert_eq!(req.code, code::GET);
    TIMEOUT_CALLS.fetch_add(1, Ordering::SeqCst);
  }

  #[test]
  fn con_request_times_out_after_retransmissions() {
    let (mut core, handle, clock, sock) = setup();

    let mut buf = [0u8; 128];
    let mut pkt = handle.req_init(&mut buf, code::GET, "/x").unwrap();
    let n = pkt.finish(&mut buf, 0, None).unwrap();
    handle.req_send(&buf[..n], dummy_addr_2(), Some(timeout_cb)).unwrap();

    assert_eq!(handle.op_state(), 1);
    assert_eq!(sock.sent_count(), 1);

    // worst-case jittered delays: 3s, 6s, 12s, 24s, 48s
    let mut t = 1_000_000u64;
    for (retransmit, delay_micros) in
      [3_100_000u64, 6_100_000, 12_100_000, 24_100_000].iter().enumerate()
    {
      t += delay_micros;
      clock.set(t);
      core.step().unwrap();
      assert_eq!(sock.sent_count(), retransmit + 2, "retransmission should have fired");
      assert_eq!(TIMEOUT_CALLS.load(Ordering::SeqCst), 0);
    }

    // budget exhausted; the next expiry fires the callback once
    t += 48_100_000;
    clock.set(t);
    core.step().unwrap();

    assert_eq!(TIMEOUT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(handle.op_state(), 0);
    assert_eq!(sock.sent_count(), 5);

    // and never again
    clock.set(t + 60_000_000);
    core.step().unwrap();
    assert_eq!(TIMEOUT_CALLS.load(Ordering::SeqCst), 1);
  }

  static RESP_CALLS: AtomicUsize = AtomicUsize::new(0);
  static RESP_TOKEN: StdMutex<Vec<u8>> = StdMutex::new(Vec::new());

  fn resp_cb(state: ReqState, pkt: &Packet, buf: &[u8], remote: Option<SocketAddr>) {
    assert_eq!(state, ReqState::Resp);
    assert!(remote.is_some());
    assert_eq!(pkt.payload(buf), b"ok");
    RESP_TOKEN.lock().unwrap().extend_from_slice(pkt.token.as_bytes());
    RESP_CALLS.fetch_add(1, Ordering::SeqCst);
  }

  #[test]
  fn response_completes_request_once() {
    let (mut core, handle, _clock, sock) = setup();

    let mut buf = [0u8; 128];
    let mut pkt = handle.req_init(&mut buf, code::GET, "/x").unwrap();
    let token = pkt.token.as_bytes().to_vec();
    let n = pkt.finish(&mut buf, 0, None).unwrap();
    handle.req_send(&buf[..n], dummy_addr(), Some(resp_cb)).unwrap();

    let req_pkt = Packet::parse(sock.sent(0).unwrap().data()).unwrap();

    let mut rbuf = [0u8; 64];
    let mut resp =
      Packet::init(&mut rbuf, Type::Ack, req_pkt.token, code::CONTENT, req_pkt.id, 8).unwrap();
    resp.payload_mut(&mut rbuf)[..2].copy_from_slice(b"ok");
    let rn = resp.finish(&mut rbuf, 2, Some(ContentFormat::TEXT)).unwrap();

    sock.push_rx(Addrd(rbuf[..rn].to_vec(), dummy_addr()));
    core.step().unwrap();

    assert_eq!(RESP_CALLS.load(Ordering::SeqCst), 1);
    // the token rides the whole round trip untouched
    assert_eq!(&*RESP_TOKEN.lock().unwrap(), &token);
    assert_eq!(handle.op_state(), 0);

    // a duplicate of the response finds nothing to complete
    sock.push_rx(Addrd(rbuf[..rn].to_vec(), dummy_addr()));
    core.step().unwrap();
    assert_eq!(RESP_CALLS.load(Ordering::SeqCst), 1);
  }

  static SEP_CALLS: AtomicUsize = AtomicUsize::new(0);

  fn sep_cb(state: ReqState, _pkt: &Packet, _buf: &[u8], remote: Option<SocketAddr>) {
    assert_eq!(state, ReqState::Resp);
    assert!(remote.is_some());
    SEP_CALLS.fetch_add(1, Ordering::SeqCst);
  }

  #[test]
  fn empty_ack_defers_to_separate_response() {
    let (mut core, handle, _clock, sock) = setup();

    let mut buf = [0u8; 128];
    let mut pkt = handle.req_init(&mut buf, code::GET, "/slow").unwrap();
    let n = pkt.finish(&mut buf, 0, None).unwrap();
    handle.req_send(&buf[..n], dummy_addr(), Some(sep_cb)).unwrap();

    let req_pkt = Packet::parse(sock.sent(0).unwrap().data()).unwrap();

    // the server acks first...
    let mut abuf = [0u8; 4];
    build_hdr(&mut abuf, Type::Ack, &Token::default(), code::EMPTY, req_pkt.id).unwrap();
    sock.push_rx(Addrd(abuf.to_vec(), dummy_addr()));
    core.step().unwrap();

    assert_eq!(SEP_CALLS.load(Ordering::SeqCst), 0);
    assert_eq!(handle.op_state(), 1, "request should wait for the separate response");

    // ...and answers later with a confirmable response of its own
    let mut rbuf = [0u8; 64];
    let mut resp =
      Packet::init(&mut rbuf, Type::Con, req_pkt.token, code::CONTENT, Id(0x9999), 8).unwrap();
    let rn = resp.finish(&mut rbuf, 0, None).unwrap();
    sock.push_rx(Addrd(rbuf[..rn].to_vec(), dummy_addr()));
    core.step().unwrap();

    assert_eq!(SEP_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(handle.op_state(), 0);

    // the engine acked the separate response so the server stops
    // retransmitting it
    let ack = Packet::parse(sock.sent(1).unwrap().data()).unwrap();
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.code, code::EMPTY);
    assert_eq!(ack.id, Id(0x9999));
  }

  #[test]
  fn reset_on_con_notification_deregisters_observer() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&TEMP_LISTENER).unwrap();

    sock.push_rx(Addrd(request(code::GET, 1, &[0xF0, 0x0D], "/t", Some(0)), dummy_addr()));
    core.step().unwrap();

    let mut buf = [0u8; 128];
    let mut note = handle.obs_init_opts(&mut buf, &TEMP_RESOURCES[0], Type::Con).unwrap();
    let n = note.finish(&mut buf, 0, None).unwrap();
    handle.obs_send(&buf[..n], &TEMP_RESOURCES[0]).unwrap();
    assert_eq!(handle.op_state(), 1);

    let note_pkt = Packet::parse(sock.sent(1).unwrap().data()).unwrap();

    // the observer rejects the notification
    let mut rbuf = [0u8; 4];
    build_hdr(&mut rbuf, Type::Reset, &Token::default(), code::EMPTY, note_pkt.id).unwrap();
    sock.push_rx(Addrd(rbuf.to_vec(), dummy_addr()));
    core.step().unwrap();

    assert_eq!(handle.op_state(), 0);
    let mut buf2 = [0u8; 128];
    assert!(matches!(handle.obs_init(&mut buf2, &TEMP_RESOURCES[0]),
                     Err(Error { what: What::NoObserver, .. })));
  }

  #[test]
  fn send_refused_when_table_full() {
    let (_core, handle, _clock, _sock) = setup();

    let mut buf = [0u8; 128];
    for _ in 0..REQ_WAITING_MAX {
      let mut pkt = handle.req_init(&mut buf, code::GET, "/x").unwrap();
      let n = pkt.finish(&mut buf, 0, None).unwrap();
      handle.req_send(&buf[..n], dummy_addr(), None).unwrap();
    }

    let mut pkt = handle.req_init(&mut buf, code::GET, "/x").unwrap();
    let n = pkt.finish(&mut buf, 0, None).unwrap();
    assert!(matches!(handle.req_send(&buf[..n], dummy_addr(), None),
                     Err(Error { what: What::NoSlot, .. })));
  }

  #[test]
  fn garbage_ingress_is_dropped_silently() {
    let (mut core, handle, _clock, sock) = setup();
    handle.register_listener(&PING_LISTENER).unwrap();

    sock.push_rx(Addrd(vec![0x00, 0x01, 0x02], dummy_addr()));
    core.step().unwrap();

    assert_eq!(sock.sent_count(), 0);
  }
}
