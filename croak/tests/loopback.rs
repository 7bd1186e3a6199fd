//! End-to-end exchange between two engines over real loopback UDP:
//! one plays server, one plays client, each on its own dispatch
//! thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use croak::config::Config;
use croak::core::Core;
use croak::platform::Std;
use croak::reqs::ReqState;
use croak::server::{HandlerResult, Listener, Resource};
use croak_msg::{code, ContentFormat, MethodFlags, Packet};

fn ping_handler(pkt: &mut Packet, buf: &mut [u8]) -> HandlerResult {
  pkt.init_response(buf, code::CONTENT)?;
  pkt.payload_mut(buf)[..4].copy_from_slice(b"pong");
  Ok(pkt.finish(buf, 4, Some(ContentFormat::TEXT))?)
}

static RESOURCES: [Resource; 1] = [Resource::new("/ping", MethodFlags::GET, ping_handler)];
static LISTENER: Listener = Listener::new(&RESOURCES);

static RESPONSES: AtomicUsize = AtomicUsize::new(0);

fn on_resp(state: ReqState,
           pkt: &Packet,
           buf: &[u8],
           remote: Option<no_std_net::SocketAddr>) {
  assert_eq!(state, ReqState::Resp);
  assert!(remote.is_some());
  assert_eq!(pkt.code, code::CONTENT);
  assert_eq!(pkt.payload(buf), b"pong");
  RESPONSES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn blocking_roundtrip() {
  let server_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
  let (mut server, server_handle) =
    Core::<Std>::new(Config::default(), croak::std::Clock::new(), server_sock);
  server_handle.register_listener(&LISTENER).unwrap();
  let server_addr = server_handle.local_addr();
  thread::spawn(move || server.run());

  let client_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
  let (mut client, client_handle) =
    Core::<Std>::new(Config::default(), croak::std::Clock::new(), client_sock);
  thread::spawn(move || client.run());

  let mut buf = [0u8; 1152];
  let mut pkt = client_handle.req_init(&mut buf, code::GET, "/ping").unwrap();
  let n = pkt.finish(&mut buf, 0, None).unwrap();

  let state = client_handle.req_send_blocking(&buf[..n], server_addr, Some(on_resp))
                           .unwrap();

  assert_eq!(state, ReqState::Resp);
  assert_eq!(RESPONSES.load(Ordering::SeqCst), 1);
  assert_eq!(client_handle.op_state(), 0);
}
