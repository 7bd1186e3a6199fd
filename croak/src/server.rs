use croak_msg::{BuildError, Code, MethodFlags, Packet};
use tinyvec::ArrayVec;

use crate::config::LISTENERS_MAX;

/// Path of the engine-owned discovery resource. Lookups check it
/// before any registered listener, so it cannot be shadowed.
pub const WELL_KNOWN_CORE: &str = "/.well-known/core";

/// What a resource handler yields: the length of the response PDU it
/// produced in the buffer.
pub type HandlerResult = Result<usize, HandlerError>;

/// A handler failed to produce a response. The engine answers the
/// request with 5.00 Internal Server Error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerError;

impl From<BuildError> for HandlerError {
  fn from(_: BuildError) -> Self {
    HandlerError
  }
}

/// A resource handler.
///
/// Called on the dispatch context with the parsed request and the PDU
/// buffer it arrived in; the handler builds its response in the same
/// buffer ([`Packet::init_response`], write payload,
/// [`Packet::finish`]) and returns its length.
///
/// Handlers must not block; every outstanding request and observer of
/// the engine waits while one runs.
pub type Handler = fn(&mut Packet, &mut [u8]) -> HandlerResult;

/// Writes one link-format entry (e.g. `</temp>;obs`) for a resource
/// into the buffer, returning the bytes written, or `None` to omit the
/// resource from discovery.
pub type LinkEncoder = fn(&Resource, &mut [u8]) -> Option<usize>;

/// A server resource: a path, the methods it serves, and its handler.
#[derive(Debug, Clone, Copy)]
pub struct Resource {
  /// The resource path, with leading `/`
  pub path: &'static str,
  /// The methods this resource accepts
  pub methods: MethodFlags,
  /// See [`Handler`]
  pub handler: Handler,
}

impl Resource {
  /// Define a resource
  pub const fn new(path: &'static str, methods: MethodFlags, handler: Handler) -> Self {
    Self { path,
           methods,
           handler }
  }
}

/// A modular collection of resources contributed by one part of the
/// application.
///
/// Resources must be ordered by path in ascending ASCII order; lookup
/// relies on this to stop scanning a listener early.
#[derive(Debug, Clone, Copy)]
pub struct Listener {
  /// The resources, ASCII-ordered by path
  pub resources: &'static [Resource],
  /// Custom link-format encoder for discovery, if the default
  /// `<path>` rendering is not enough
  pub link_encoder: Option<LinkEncoder>,
}

impl Listener {
  /// Define a listener over an ASCII-ordered resource array
  pub const fn new(resources: &'static [Resource]) -> Self {
    Self { resources,
           link_encoder: None }
  }

  /// Define a listener with a custom link encoder
  pub const fn with_link_encoder(resources: &'static [Resource], enc: LinkEncoder) -> Self {
    Self { resources,
           link_encoder: Some(enc) }
  }
}

/// Outcome of a resource lookup
#[derive(Debug, Clone, Copy)]
pub enum Lookup {
  /// A resource matched the path and accepts the request method
  Found(&'static Resource, &'static Listener),
  /// Some resource matched the path, but none of them accepts the
  /// method; answered with 4.05
  WrongMethod,
  /// No resource matched the path; answered with 4.04
  NoPath,
}

/// The ordered set of registered listeners
#[derive(Debug, Default)]
pub(crate) struct Listeners {
  regs: ArrayVec<[Option<&'static Listener>; LISTENERS_MAX]>,
}

impl Listeners {
  /// Append a listener to the end of the lookup order. Fails when the
  /// registry is full.
  pub(crate) fn register(&mut self, listener: &'static Listener) -> Result<(), ()> {
    if self.regs.len() == LISTENERS_MAX {
      return Err(());
    }

    self.regs.push(Some(listener));
    Ok(())
  }

  /// Find the resource serving `path` with the request method `flag`.
  ///
  /// Listeners are scanned in registration order. Within a listener
  /// the resources are ASCII-ordered, so scanning stops at the first
  /// resource whose path sorts after the request's; a path match with
  /// the wrong method is remembered but the scan moves on to the next
  /// listener, which may still serve the method.
  pub(crate) fn find(&self, path: &[u8], flag: MethodFlags) -> Lookup {
    let mut wrong_method = false;

    for listener in self.regs.iter().flatten() {
      for resource in listener.resources {
        match path.cmp(&resource.path.as_bytes()) {
          | core::cmp::Ordering::Greater => continue,
          | core::cmp::Ordering::Equal if resource.methods.contains(flag) => {
            return Lookup::Found(resource, listener);
          },
          | core::cmp::Ordering::Equal => {
            wrong_method = true;
            break;
          },
          // resources are in ascending order; no match further down
          | core::cmp::Ordering::Less => break,
        }
      }
    }

    if wrong_method {
      Lookup::WrongMethod
    } else {
      Lookup::NoPath
    }
  }

  /// Emit the link-format resource listing of every registered
  /// listener (`</a>,</b>`), truncating when `buf` fills up.
  pub(crate) fn resource_list(&self, buf: &mut [u8]) -> usize {
    let mut pos = 0;

    for listener in self.regs.iter().flatten() {
      for resource in listener.resources {
        let sep = usize::from(pos > 0);

        if let Some(enc) = listener.link_encoder {
          if pos + sep >= buf.len() {
            return pos;
          }
          if let Some(n) = enc(resource, &mut buf[pos + sep..]) {
            if sep > 0 {
              buf[pos] = b',';
            }
            pos += sep + n;
          }
          continue;
        }

        let path = resource.path.as_bytes();
        if pos + path.len() + 3 > buf.len() {
          return pos;
        }
        if pos > 0 {
          buf[pos] = b',';
          pos += 1;
        }
        buf[pos] = b'<';
        buf[pos + 1..pos + 1 + path.len()].copy_from_slice(path);
        buf[pos + 1 + path.len()] = b'>';
        pos += path.len() + 2;
      }
    }

    pos
  }
}

/// Synthesize a payloadless response to a request, in place: 4.04 and
/// 4.05 replies, and anything else that needs no handler.
pub fn response(pkt: &mut Packet, buf: &mut [u8], code: Code) -> Result<usize, BuildError> {
  pkt.clear_observe();
  pkt.init_response(buf, code)?;
  pkt.finish(buf, 0, None)
}

#[cfg(test)]
mod tests {
  use croak_msg::code;

  use super::*;

  fn nop(_: &mut Packet, _: &mut [u8]) -> HandlerResult {
    Err(HandlerError)
  }

  static ORDERED: [Resource; 3] = [Resource::new("/a", MethodFlags::GET, nop),
                                   Resource::new("/b", MethodFlags::GET.with(MethodFlags::PUT),
                                                 nop),
                                   Resource::new("/c", MethodFlags::GET, nop)];
  static LISTENER: Listener = Listener::new(&ORDERED);

  static SHADOW: [Resource; 1] = [Resource::new("/b", MethodFlags::POST, nop)];
  static SHADOW_LISTENER: Listener = Listener::new(&SHADOW);

  fn registry() -> Listeners {
    let mut listeners = Listeners::default();
    listeners.register(&LISTENER).unwrap();
    listeners
  }

  #[test]
  fn lookup_hit() {
    let listeners = registry();
    match listeners.find(b"/b", MethodFlags::PUT) {
      | Lookup::Found(resource, _) => assert_eq!(resource.path, "/b"),
      | _ => panic!("expected Found"),
    }
  }

  #[test]
  fn lookup_wrong_method() {
    let listeners = registry();
    assert!(matches!(listeners.find(b"/b", MethodFlags::DELETE),
                     Lookup::WrongMethod));
  }

  #[test]
  fn lookup_no_path() {
    let listeners = registry();
    assert!(matches!(listeners.find(b"/nope", MethodFlags::GET), Lookup::NoPath));
  }

  #[test]
  fn lookup_stops_before_first_candidate() {
    // "/A" sorts before every registered path, so the scan must bail
    // at "/a" without a match
    let listeners = registry();
    assert!(matches!(listeners.find(b"/A", MethodFlags::GET), Lookup::NoPath));
  }

  #[test]
  fn wrong_method_rescued_by_later_listener() {
    let mut listeners = registry();
    listeners.register(&SHADOW_LISTENER).unwrap();

    match listeners.find(b"/b", MethodFlags::POST) {
      | Lookup::Found(resource, _) => assert_eq!(resource.methods, MethodFlags::POST),
      | _ => panic!("expected the second listener to serve POST /b"),
    }
  }

  #[test]
  fn link_format_listing() {
    let listeners = registry();
    let mut buf = [0u8; 64];
    let n = listeners.resource_list(&mut buf);
    assert_eq!(&buf[..n], b"</a>,</b>,</c>");
  }

  #[test]
  fn link_format_truncates() {
    let listeners = registry();
    let mut buf = [0u8; 6];
    let n = listeners.resource_list(&mut buf);
    assert_eq!(&buf[..n], b"</a>");
  }

  #[test]
  fn synthesized_not_found() {
    let req = [0x41, 0x01, 0x12, 0x34, 0xAB];
    let mut buf = [0u8; 64];
    buf[..req.len()].copy_from_slice(&req);

    let mut pkt = Packet::parse(&buf[..req.len()]).unwrap();
    let n = response(&mut pkt, &mut buf, code::NOT_FOUND).unwrap();

    let resp = Packet::parse(&buf[..n]).unwrap();
    assert_eq!(resp.code, code::NOT_FOUND);
    assert_eq!(resp.id, croak_msg::Id(0x1234));
    assert_eq!(resp.token.as_bytes(), &[0xAB]);
  }
}
