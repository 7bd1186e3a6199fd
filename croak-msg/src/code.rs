/// # Message Code
///
/// An 8-bit unsigned integer, split into a 3-bit class (most significant
/// bits) and a 5-bit detail (least significant bits), documented as
/// `c.dd` where `c` is the class and `dd` is the detail.
///
/// The class can indicate a request (0), a success response (2), a
/// client error response (4), or a server error response (5).
///
/// See [RFC7252 - Message Details](https://datatracker.ietf.org/doc/html/rfc7252#section-3) for context
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub struct Code {
  /// The code class (0-7)
  pub class: u8,
  /// The code detail (0-31)
  pub detail: u8,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use croak_msg::Code;
  ///
  /// let content = Code::new(2, 5); // 2.05 Content
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Whether this code is for a request, response, or empty message
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// The method bit corresponding to a request code, used to test a
  /// resource's method mask.
  ///
  /// Yields `None` for response and empty codes, and for request
  /// details outside GET / POST / PUT / DELETE.
  pub fn method_flag(&self) -> Option<MethodFlags> {
    match (self.class, self.detail) {
      | (0, d @ 1..=4) => Some(MethodFlags(1 << (d - 1))),
      | _ => None,
    }
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    Self { class: b >> 5,
           detail: b & 0b11111 }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    (code.class << 5) | code.detail
  }
}

/// Whether a code belongs to a request, a response, or an empty message
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum CodeKind {
  /// A request code (0.01 - 0.31)
  Request,
  /// A response code (2.xx, 4.xx, 5.xx)
  Response,
  /// 0.00
  Empty,
}

/// A set of request methods, stored as a bitmask.
///
/// Resources declare the methods they serve with this mask and the
/// request dispatcher tests membership with [`MethodFlags::contains`].
///
/// ```
/// use croak_msg::{code, MethodFlags};
///
/// let rw = MethodFlags::GET.with(MethodFlags::PUT);
/// assert!(rw.contains(code::GET.method_flag().unwrap()));
/// assert!(!rw.contains(code::POST.method_flag().unwrap()));
/// ```
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug, Default)]
pub struct MethodFlags(pub u8);

impl MethodFlags {
  /// GET requests
  pub const GET: Self = Self(1 << 0);
  /// POST requests
  pub const POST: Self = Self(1 << 1);
  /// PUT requests
  pub const PUT: Self = Self(1 << 2);
  /// DELETE requests
  pub const DELETE: Self = Self(1 << 3);

  /// Union of two method sets
  pub const fn with(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  /// Does this set contain every method in `other`?
  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }
}

/// A Content-Format option value.
///
/// See the [CoAP Content-Formats registry](https://datatracker.ietf.org/doc/html/rfc7252#section-12.3).
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
  /// `text/plain; charset=utf-8`
  pub const TEXT: Self = Self(0);
  /// `application/link-format`
  pub const LINK_FORMAT: Self = Self(40);
  /// `application/xml`
  pub const XML: Self = Self(41);
  /// `application/octet-stream`
  pub const OCTET_STREAM: Self = Self(42);
  /// `application/json`
  pub const JSON: Self = Self(50);

  /// The minimal big-endian encoding of this value (0-2 bytes)
  pub fn bytes(&self) -> tinyvec::ArrayVec<[u8; 2]> {
    let mut out = tinyvec::ArrayVec::new();
    match self.0 {
      | 0 => (),
      | n if n < 256 => out.push(n as u8),
      | n => out.extend_from_slice(&n.to_be_bytes()),
    }
    out
  }
}

/// 0.00, the empty message
pub const EMPTY: Code = Code::new(0, 0);

/// 0.01 GET
pub const GET: Code = Code::new(0, 1);
/// 0.02 POST
pub const POST: Code = Code::new(0, 2);
/// 0.03 PUT
pub const PUT: Code = Code::new(0, 3);
/// 0.04 DELETE
pub const DELETE: Code = Code::new(0, 4);

/// 2.01 Created
pub const CREATED: Code = Code::new(2, 1);
/// 2.02 Deleted
pub const DELETED: Code = Code::new(2, 2);
/// 2.03 Valid
pub const VALID: Code = Code::new(2, 3);
/// 2.04 Changed
pub const CHANGED: Code = Code::new(2, 4);
/// 2.05 Content
pub const CONTENT: Code = Code::new(2, 5);

/// 4.00 Bad Request
pub const BAD_REQUEST: Code = Code::new(4, 0);
/// 4.04 Not Found
pub const NOT_FOUND: Code = Code::new(4, 4);
/// 4.05 Method Not Allowed
pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);

/// 5.00 Internal Server Error
pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
