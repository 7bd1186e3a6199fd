//! `croak` is an event-driven CoAP messaging engine that plays both
//! sides of the protocol at once:
//!
//! - as a **server** it routes incoming requests through registered
//!   [`Listener`](server::Listener)s to resource handlers and sends
//!   their responses back, including Observe (RFC 7641) registrations
//!   and notifications;
//! - as a **client** it tracks every outstanding request in a
//!   fixed-capacity table, retransmits Confirmable messages with
//!   exponential backoff and jitter, and invokes a response callback
//!   exactly once per request: with the response, or with a timeout.
//!
//! ## Concurrency model
//! All protocol state lives behind one lock and is driven by a single
//! dispatch context ([`core::Core`]), which alternates between its
//! mailbox (timer and wake-up events) and the transport. Any number of
//! user threads talk to the engine through a cloneable
//! [`core::Handle`]; the only state they touch directly is the
//! request-table slot claimed under the lock when a request is sent.
//!
//! ## Allocation
//! There is none. Capacities are fixed at compile time (see
//! [`config`]): so many in-flight requests, so many observers, so many
//! retransmit buffers. When a table is full the send is refused rather
//! than queued.
//!
//! ```no_run
//! use croak::core::Core;
//! use croak::platform::Std;
//! use croak::server::{Listener, Resource};
//! use croak_msg::{code, ContentFormat, MethodFlags, Packet};
//!
//! fn hello(pkt: &mut Packet, buf: &mut [u8]) -> croak::server::HandlerResult {
//!   pkt.init_response(buf, code::CONTENT)?;
//!   pkt.payload_mut(buf)[..2].copy_from_slice(b"hi");
//!   Ok(pkt.finish(buf, 2, Some(ContentFormat::TEXT))?)
//! }
//!
//! static RESOURCES: [Resource; 1] = [Resource::new("/hello", MethodFlags::GET, hello)];
//! static LISTENER: Listener = Listener::new(&RESOURCES);
//!
//! let sock = std::net::UdpSocket::bind("0.0.0.0:5683").unwrap();
//! let (mut core, handle) = Core::<Std>::new(Default::default(), croak::std::Clock::new(), sock);
//! handle.register_listener(&LISTENER).unwrap();
//! core.run();
//! ```

// x-release-please-start-version
#![doc(html_root_url = "https://docs.rs/croak/0.1.0")]
// x-release-please-end
// style
#![allow(clippy::unused_unit)]
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// features
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(test)]
pub(crate) mod test;

/// runtime tunables and compile-time capacities
pub mod config;

/// network abstractions
pub mod net;

/// observe registrations
pub mod observe;

/// platform configuration
pub mod platform;

/// tracking of outstanding requests
pub mod reqs;

/// retransmission timing
pub mod retry;

/// the consumed DTLS adapter contract
pub mod secure;

/// resource listeners and request routing
pub mod server;

/// time abstractions
pub mod time;

/// the dispatch context and the user-facing handle
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod core;

/// `std` implementations of the platform pieces
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;
