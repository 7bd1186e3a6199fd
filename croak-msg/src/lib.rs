//! Low-level representation of CoAP messages.
//!
//! The central item of `croak_msg` is [`Packet`]: the decoded view of a
//! single CoAP message, either parsed from a received datagram or built
//! in-place inside a caller-provided PDU buffer.
//!
//! ## Buffers
//! CoAP is meant for constrained targets, so this crate never allocates.
//! A [`Packet`] owns small fixed-capacity copies of the header fields,
//! the token, and the decoded Uri-Path / Uri-Query strings, and records
//! the payload as a window (offset + length) into the PDU buffer the
//! caller supplied. The buffer itself is always passed explicitly to the
//! operations that need it.
//!
//! ## Building
//! An outgoing message is built back-to-front: the header is written
//! first, the payload is written into a window that leaves a gap for the
//! options, and [`Packet::finish`] serializes the options (in strictly
//! ascending option-number order, as the wire format demands) and moves
//! the payload flush against them.
//!
//! ```
//! use croak_msg::{code, Id, Packet, Token, Type};
//!
//! let mut buf = [0u8; 128];
//! let token = Token::from_slice(&[0xAB]);
//! let mut pkt = Packet::init(&mut buf, Type::Con, token, code::GET, Id(0x1234), 32).unwrap();
//! pkt.set_path("/sensors/temp").unwrap();
//! let len = pkt.finish(&mut buf, 0, None).unwrap();
//!
//! let parsed = Packet::parse(&buf[..len]).unwrap();
//! assert_eq!(parsed.path(), b"/sensors/temp");
//! assert_eq!(parsed.id, Id(0x1234));
//! ```

// x-release-please-start-version
#![doc(html_root_url = "https://docs.rs/croak-msg/0.1.0")]
// x-release-please-end
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(test), forbid(missing_debug_implementations, unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code, missing_copy_implementations))]
#![deny(missing_docs)]

/// Message Code
pub mod code;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Packet parse errors
pub mod parse_error;

/// The parsed / built message
pub mod pkt;

/// Message Token
pub mod token;

/// Message Type
pub mod ty;

#[doc(inline)]
pub use code::{Code, CodeKind, ContentFormat, MethodFlags};
#[doc(inline)]
pub use id::Id;
#[doc(inline)]
pub use opt::BuildError;
#[doc(inline)]
pub use parse_error::ParseError;
#[doc(inline)]
pub use pkt::{build_hdr, Packet, PAYLOAD_MARKER, QS_MAX, URL_MAX};
#[doc(inline)]
pub use token::Token;
#[doc(inline)]
pub use ty::Type;
